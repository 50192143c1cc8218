pub mod ids;
pub mod variables;
pub mod condition;
pub mod handler;
pub mod context;
pub mod syscall;
pub mod task;
pub mod order;
pub mod node;
pub mod lock;
pub mod group;
pub mod selection;
pub mod engine;
pub mod storage;
