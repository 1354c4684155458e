//! Paused-state snapshot: stack frames, their scopes and variables.

use std::fmt::{self, Write as _};

use tracing::debug;

use crate::protocol::{self, parse_address};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: String,
    /// Handle for fetching nested children, when the value has any.
    pub variables_reference: Option<u32>,
}

impl From<protocol::Variable> for Variable {
    fn from(variable: protocol::Variable) -> Self {
        Self {
            name: variable.name,
            value: variable.value,
            type_name: variable.r#type.unwrap_or_default(),
            variables_reference: (variable.variables_reference != 0)
                .then_some(variable.variables_reference),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope {
    pub name: String,
    pub presentation_hint: String,
    pub variables: Vec<Variable>,
}

impl Scope {
    #[must_use]
    pub fn placeholder(scope: &protocol::Scope) -> Self {
        Self {
            name: scope.name.clone(),
            presentation_hint: scope.presentation_hint.clone().unwrap_or_default(),
            variables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub address: u32,
    pub scopes: Vec<Scope>,
}

impl StackFrame {
    #[must_use]
    pub fn placeholder(frame: &protocol::StackFrame) -> Self {
        let address = match frame.instruction_pointer_reference.as_deref() {
            Some(reference) => parse_address(reference).unwrap_or_else(|| {
                debug!(frame = frame.id, reference, "unparsable instruction pointer");
                0
            }),
            None => 0,
        };
        Self {
            id: frame.id,
            name: frame.name.clone(),
            address,
            scopes: Vec::new(),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} @ 0x{:x}", self.id, self.name, self.address)
    }
}

/// Indented text rendering of a stack tree.
#[must_use]
pub fn format_stack_trace(frames: &[StackFrame]) -> String {
    let mut out = String::new();
    for frame in frames {
        let _ = writeln!(out, "{frame}");
        for scope in &frame.scopes {
            if scope.presentation_hint.is_empty() {
                let _ = writeln!(out, "  {}", scope.name);
            } else {
                let _ = writeln!(out, "  {} ({})", scope.name, scope.presentation_hint);
            }
            for variable in &scope.variables {
                let _ = write!(
                    out,
                    "    {}: {} = {}",
                    variable.name, variable.type_name, variable.value
                );
                if let Some(reference) = variable.variables_reference {
                    let _ = write!(out, " [{reference}]");
                }
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn frame_address_falls_back_to_zero() {
        let frame = StackFrame::placeholder(&protocol::StackFrame {
            id: 2,
            name: "main".to_string(),
            instruction_pointer_reference: Some("not-hex".to_string()),
        });
        assert_eq!(frame.address, 0);
    }

    #[test]
    fn renders_tree() {
        let frames = vec![StackFrame {
            id: 0,
            name: "SYSTEM.Main".to_string(),
            address: 0x1a4,
            scopes: vec![Scope {
                name: "Locals".to_string(),
                presentation_hint: "locals".to_string(),
                variables: vec![
                    Variable {
                        name: "i".to_string(),
                        value: "3".to_string(),
                        type_name: "int".to_string(),
                        variables_reference: None,
                    },
                    Variable {
                        name: "msg".to_string(),
                        value: "{...}".to_string(),
                        type_name: "struct".to_string(),
                        variables_reference: Some(5),
                    },
                ],
            }],
        }];
        expect![[r#"
            #0 SYSTEM.Main @ 0x1a4
              Locals (locals)
                i: int = 3
                msg: struct = {...} [5]
        "#]]
        .assert_eq(&format_stack_trace(&frames));
    }
}
