use crate::runtime::order::OrderRegistry;

pub mod builtin;
pub mod common;
pub mod flow;

/// Registers every built-in order kind.
pub fn register_standard_orders(registry: &mut OrderRegistry) {
    registry.register(Box::new(common::LogDefinition));
    registry.register(Box::new(common::StopDefinition));
    registry.register(Box::new(flow::JumpDefinition));
    registry.register(Box::new(flow::CallDefinition));
    registry.register(Box::new(flow::WaitDefinition));
    registry.register(Box::new(flow::BroadcastDefinition));
    registry.register(Box::new(builtin::SetVariableDefinition));
}

/// Replaces `${name}` placeholders with variable values.
pub(crate) fn interpolate(text: &str, lookup: impl Fn(&str) -> Option<serde_json::Value>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = &rest[start + 2..start + len];
        match lookup(key) {
            Some(serde_json::Value::String(s)) => out.push_str(&s),
            Some(v) => out.push_str(&v.to_string()),
            None => out.push_str(&rest[start..start + len + 1]),
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}
