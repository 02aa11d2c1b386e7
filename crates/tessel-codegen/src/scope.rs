use std::collections::{HashMap, HashSet};

use crate::types::ValueType;

#[derive(Debug, Clone)]
pub struct LocalVar {
    pub host_name: String,
    pub ty: ValueType,
}

/// Lexical scopes of one procedure
///
/// Every local gets a host name unique within the procedure. A local that
/// shadows a global or an earlier local is renamed to `name$N`.
#[derive(Debug, Default)]
pub struct LocalScopes {
    scopes: Vec<HashMap<String, LocalVar>>,
    used: HashSet<String>,
    /// Non-parameter locals in declaration order
    pub declared: Vec<(String, ValueType)>,
}

impl LocalScopes {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
            ..Default::default()
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    /// Declare a name in the innermost scope. Returns `None` when the name is
    /// already declared in that same scope.
    pub fn declare(
        &mut self,
        name: &str,
        ty: ValueType,
        globals: &HashMap<String, ValueType>,
        is_param: bool,
    ) -> Option<String> {
        let innermost = self.scopes.last()?;
        if innermost.contains_key(name) {
            return None;
        }

        let host_name = if !self.used.contains(name) && !globals.contains_key(name) {
            name.to_string()
        } else {
            (1..)
                .map(|n| format!("{name}${n}"))
                .find(|candidate| !self.used.contains(candidate))
                .unwrap_or_else(|| name.to_string())
        };

        self.used.insert(host_name.clone());
        if !is_param {
            self.declared.push((host_name.clone(), ty));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name.to_string(),
                LocalVar {
                    host_name: host_name.clone(),
                    ty,
                },
            );
        }
        Some(host_name)
    }

    pub fn resolve(&self, name: &str) -> Option<&LocalVar> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_gets_fresh_names() {
        let mut globals = HashMap::new();
        globals.insert("count".to_string(), ValueType::Integer);

        let mut scopes = LocalScopes::new();
        assert_eq!(
            scopes.declare("count", ValueType::Float, &globals, false).as_deref(),
            Some("count$1")
        );
        assert_eq!(
            scopes.declare("i", ValueType::Integer, &globals, false).as_deref(),
            Some("i")
        );
        scopes.push();
        assert_eq!(
            scopes.declare("i", ValueType::String, &globals, false).as_deref(),
            Some("i$1")
        );
        assert_eq!(scopes.resolve("i").map(|v| v.ty), Some(ValueType::String));
        scopes.pop();
        assert_eq!(scopes.resolve("i").map(|v| v.ty), Some(ValueType::Integer));
        assert_eq!(scopes.declared.len(), 3);
    }

    #[test]
    fn test_duplicate_in_same_scope() {
        let globals = HashMap::new();
        let mut scopes = LocalScopes::new();
        assert!(scopes.declare("x", ValueType::Integer, &globals, true).is_some());
        assert!(scopes.declare("x", ValueType::Integer, &globals, false).is_none());
    }
}
