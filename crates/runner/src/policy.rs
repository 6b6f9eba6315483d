use regex::Regex;

/// Modules a script may not import. Matched as `import NAME` or `from NAME`.
pub const FORBIDDEN_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "pathlib",
    "io",
    "glob",
    "tempfile",
    "socket",
    "ssl",
    "http",
    "urllib",
    "requests",
    "pickle",
    "marshal",
    "shelve",
    "inspect",
    "ctypes",
    "gc",
    "builtins",
    "threading",
    "multiprocessing",
    "concurrent",
    "asyncio",
    "signal",
];

/// Builtins a script may not call.
pub const FORBIDDEN_CALLS: &[&str] = &[
    "eval", "exec", "open", "compile", "exit", "quit", "globals", "vars", "getattr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny { rule: String },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Static check run on the exact text that is about to execute.
pub trait SafetyPolicy: Send + Sync {
    fn evaluate(&self, code: &str) -> Verdict;
}

#[derive(Debug, Clone)]
pub struct DenyRule {
    pub name: String,
    pattern: Regex,
}

impl DenyRule {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, code: &str) -> bool {
        self.pattern.is_match(code)
    }
}

/// Ordered list of patterns searched anywhere in the raw text. The first hit denies.
///
/// This is text matching, not parsing: a pattern inside a string literal or a comment
/// is still a hit, and an alias that reaches the same capability is not.
#[derive(Debug, Clone)]
pub struct DenylistPolicy {
    rules: Vec<DenyRule>,
}

impl DenylistPolicy {
    pub fn new(rules: Vec<DenyRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[DenyRule] {
        &self.rules
    }
}

impl Default for DenylistPolicy {
    fn default() -> Self {
        let capacity = FORBIDDEN_MODULES.len() * 2 + FORBIDDEN_CALLS.len() + 2;
        let mut rules = Vec::with_capacity(capacity);
        for module in FORBIDDEN_MODULES {
            rules.push(builtin_rule(
                format!("import:{module}"),
                &format!(r"\bimport\s+{module}\b"),
            ));
            rules.push(builtin_rule(
                format!("from:{module}"),
                &format!(r"\bfrom\s+{module}\b"),
            ));
        }
        rules.push(builtin_rule("importlib".to_owned(), r"importlib"));
        rules.push(builtin_rule("dunder".to_owned(), r"__\w+__"));
        for call in FORBIDDEN_CALLS {
            rules.push(builtin_rule(
                format!("call:{call}"),
                &format!(r"\b{call}\s*\("),
            ));
        }
        Self { rules }
    }
}

fn builtin_rule(name: String, pattern: &str) -> DenyRule {
    DenyRule::new(name, pattern).expect("regex")
}

impl SafetyPolicy for DenylistPolicy {
    fn evaluate(&self, code: &str) -> Verdict {
        self.rules
            .iter()
            .find(|rule| rule.matches(code))
            .map_or(Verdict::Allow, |rule| Verdict::Deny {
                rule: rule.name.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied_by(code: &str) -> Option<String> {
        match DenylistPolicy::default().evaluate(code) {
            Verdict::Allow => None,
            Verdict::Deny { rule } => Some(rule),
        }
    }

    #[test]
    fn dangerous_snippets_are_denied() {
        assert_eq!(denied_by("import os").as_deref(), Some("import:os"));
        assert_eq!(denied_by("x = eval('1+1')").as_deref(), Some("call:eval"));
        assert_eq!(denied_by("print((1).__class__)").as_deref(), Some("dunder"));
        assert_eq!(denied_by("f = open ('a.txt')").as_deref(), Some("call:open"));
        assert_eq!(
            denied_by("from subprocess import run").as_deref(),
            Some("from:subprocess")
        );
        assert_eq!(
            denied_by("m = importlib.import_module('x')").as_deref(),
            Some("importlib")
        );
    }

    #[test]
    fn plain_arithmetic_and_allowed_libraries_pass() {
        let code = "import math\nimport random\nimport hashlib, base64\n\
                    print(math.sqrt(16) + 2 * 3)\n\
                    print(hashlib.sha256(b'x').hexdigest())\n\
                    print(len([1, 2, 3]))";
        assert_eq!(denied_by(code), None);
    }

    #[test]
    fn matching_ignores_word_prefixes() {
        assert_eq!(denied_by("import osmosis"), None);
        assert_eq!(denied_by("reopen = 1\nprint(reopen)"), None);
        assert_eq!(denied_by("my_eval(3)"), None);
    }

    #[test]
    fn string_literals_and_comments_still_match() {
        assert!(denied_by("print('eval(')").is_some());
        assert!(denied_by("# import os").is_some());
    }

    #[test]
    fn rules_are_evaluated_in_order() {
        let policy = DenylistPolicy::new(vec![
            DenyRule::new("first", "print").unwrap(),
            DenyRule::new("second", "print\\(").unwrap(),
        ]);
        assert_eq!(
            policy.evaluate("print(1)"),
            Verdict::Deny {
                rule: "first".to_owned()
            }
        );
        assert!(policy.evaluate("1 + 1").is_allowed());
    }
}
