use crate::error::{FlowError, FlowResult};
use dashmap::DashMap;
use evalexpr::{ContextWithMutableVariables, DefaultNumericTypes, HashMapContext};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    /// Visible to one engine only.
    Local,
    /// Shared by every engine holding the same [`GlobalVariables`].
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOperator {
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<=")]
    LessThanOrEquals,
    #[serde(rename = ">=")]
    GreaterThanOrEquals,
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOperator::Equals => "==",
            CompareOperator::NotEquals => "!=",
            CompareOperator::LessThan => "<",
            CompareOperator::GreaterThan => ">",
            CompareOperator::LessThanOrEquals => "<=",
            CompareOperator::GreaterThanOrEquals => ">=",
        };
        f.write_str(symbol)
    }
}

impl CompareOperator {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOperator::Equals => ordering == Ordering::Equal,
            CompareOperator::NotEquals => ordering != Ordering::Equal,
            CompareOperator::LessThan => ordering == Ordering::Less,
            CompareOperator::GreaterThan => ordering == Ordering::Greater,
            CompareOperator::LessThanOrEquals => ordering != Ordering::Greater,
            CompareOperator::GreaterThanOrEquals => ordering != Ordering::Less,
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, CompareOperator::Equals | CompareOperator::NotEquals)
    }
}

/// Compares two variable values.
///
/// Numbers support every operator, strings compare lexically, booleans only
/// support `==` and `!=`. Anything else is a type mismatch.
pub fn compare(left: &Value, operator: CompareOperator, right: &Value) -> FlowResult<bool> {
    let mismatch = || FlowError::TypeMismatch {
        operator,
        left: left.clone(),
        right: right.clone(),
    };

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().ok_or_else(mismatch)?, b.as_f64().ok_or_else(mismatch)?);
            a.partial_cmp(&b).ok_or_else(mismatch)?
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) if operator.is_equality() => a.cmp(b),
        _ => return Err(mismatch()),
    };

    Ok(operator.accepts(ordering))
}

/// Variables shared between engines.
#[derive(Debug, Clone, Default)]
pub struct GlobalVariables(Arc<DashMap<String, Value>>);

impl GlobalVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.get(key).map(|v| v.value().clone())
    }

    pub fn set(&self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    fn to_map(&self) -> BTreeMap<String, Value> {
        self.0.iter().map(|item| (item.key().clone(), item.value().clone())).collect()
    }
}

/// Serializable copy of every variable value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariablesSnapshot {
    #[serde(default)]
    pub local: BTreeMap<String, Value>,
    #[serde(default)]
    pub global: BTreeMap<String, Value>,
}

/// Variable store of one engine: its own local scope plus a handle to the
/// global scope. Lookups try local first.
#[derive(Debug, Default)]
pub struct Variables {
    local: HashMap<String, Value>,
    global: GlobalVariables,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_globals(global: GlobalVariables) -> Self {
        Self {
            local: HashMap::new(),
            global,
        }
    }

    pub fn globals(&self) -> &GlobalVariables {
        &self.global
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.local.get(key).cloned().or_else(|| self.global.get(key))
    }

    pub fn scope_of(&self, key: &str) -> Option<VariableScope> {
        if self.local.contains_key(key) {
            Some(VariableScope::Local)
        } else if self.global.contains(key) {
            Some(VariableScope::Global)
        } else {
            None
        }
    }

    /// Writes into whichever scope already holds `key`; new keys go local.
    pub fn set(&mut self, key: &str, value: Value) {
        match self.scope_of(key) {
            Some(VariableScope::Global) => self.global.set(key, value),
            _ => {
                self.local.insert(key.to_string(), value);
            }
        }
    }

    pub fn declare(&mut self, key: &str, value: Value, scope: VariableScope) {
        match scope {
            VariableScope::Local => {
                self.local.insert(key.to_string(), value);
            }
            VariableScope::Global => self.global.set(key, value),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.local.remove(key).or_else(|| self.global.remove(key))
    }

    /// `variable <operator> value`, failing when the variable is missing or
    /// the types cannot be compared.
    pub fn evaluate(&self, key: &str, operator: CompareOperator, value: &Value) -> FlowResult<bool> {
        let current = self.get(key).ok_or_else(|| FlowError::VariableNotFound(key.to_string()))?;
        compare(&current, operator, value)
    }

    /// Builds an expression context holding every scalar variable.
    pub fn eval_context(&self) -> HashMapContext<DefaultNumericTypes> {
        let mut eval_ctx = HashMapContext::<DefaultNumericTypes>::new();
        let globals = self.global.to_map();
        let all = globals.iter().chain(self.local.iter());
        for (k, v) in all {
            if let Some(ev) = to_eval_value(v) {
                let _ = eval_ctx.set_value(k.clone(), ev);
            }
        }
        eval_ctx
    }

    pub fn snapshot(&self) -> VariablesSnapshot {
        VariablesSnapshot {
            local: self.local.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            global: self.global.to_map(),
        }
    }

    /// Replaces the locals with the saved ones. Saved globals are written
    /// key by key and other globals are kept.
    pub fn restore(&mut self, snapshot: &VariablesSnapshot) {
        self.local.clear();
        for (k, v) in &snapshot.local {
            self.local.insert(k.clone(), v.clone());
        }
        for (k, v) in &snapshot.global {
            self.global.set(k, v.clone());
        }
    }
}

pub(crate) fn to_eval_value(v: &Value) -> Option<evalexpr::Value<DefaultNumericTypes>> {
    match v {
        Value::String(s) => Some(evalexpr::Value::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() { Some(evalexpr::Value::Int(i)) }
            else if let Some(f) = n.as_f64() { Some(evalexpr::Value::Float(f)) }
            else { None }
        }
        Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
        _ => None,
    }
}

pub(crate) fn from_eval_value(v: evalexpr::Value<DefaultNumericTypes>) -> Option<Value> {
    match v {
        evalexpr::Value::String(s) => Some(Value::String(s)),
        evalexpr::Value::Int(i) => Some(Value::from(i)),
        evalexpr::Value::Float(f) => serde_json::Number::from_f64(f).map(Value::Number),
        evalexpr::Value::Boolean(b) => Some(Value::Bool(b)),
        _ => None,
    }
}
