//! Deny-list filter for generated patches
//!
//! A plain, case-sensitive substring check over the raw patch text. It stops
//! the obvious cases (spawning processes, touching the filesystem module,
//! network calls, reading the environment) and nothing more: aliasing or
//! indirection gets straight through. Treat it as a guard rail, not a sandbox.

use std::sync::OnceLock;

/// Capability the denied substring belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedCapability {
    ProcessSpawn,
    Filesystem,
    Network,
    Environment,
    Other,
}

impl DeniedCapability {
    pub fn label(&self) -> &'static str {
        match self {
            DeniedCapability::ProcessSpawn => "process spawning",
            DeniedCapability::Filesystem => "filesystem access",
            DeniedCapability::Network => "network access",
            DeniedCapability::Environment => "environment access",
            DeniedCapability::Other => "denied pattern",
        }
    }
}

const DENY_LIST: &[(&str, DeniedCapability)] = &[
    ("child_process", DeniedCapability::ProcessSpawn),
    ("execSync", DeniedCapability::ProcessSpawn),
    ("spawnSync", DeniedCapability::ProcessSpawn),
    ("process.kill", DeniedCapability::ProcessSpawn),
    ("fs.writeFile", DeniedCapability::Filesystem),
    ("fs.unlink", DeniedCapability::Filesystem),
    ("fs.rm", DeniedCapability::Filesystem),
    ("fetch(", DeniedCapability::Network),
    ("XMLHttpRequest", DeniedCapability::Network),
    ("process.env", DeniedCapability::Environment),
];

/// Modules denied by specifier, in every plain `require`/`import` spelling
const DENIED_MODULES: &[(&str, DeniedCapability)] = &[
    ("fs", DeniedCapability::Filesystem),
    ("fs/promises", DeniedCapability::Filesystem),
    ("http", DeniedCapability::Network),
    ("https", DeniedCapability::Network),
    ("net", DeniedCapability::Network),
];

/// `require('m')`, `import('m')` and `from 'm'` with either quote, with and
/// without the `node:` prefix.
fn module_specifier_forms(module: &str) -> Vec<String> {
    let mut forms = Vec::new();
    for prefix in ["", "node:"] {
        for quote in ['\'', '"'] {
            let spec = format!("{quote}{prefix}{module}{quote}");
            forms.push(format!("require({spec})"));
            forms.push(format!("import({spec})"));
            forms.push(format!("from {spec}"));
        }
    }
    forms
}

/// Literal entries followed by every module specifier form.
fn builtin_rules() -> &'static [(String, DeniedCapability)] {
    static RULES: OnceLock<Vec<(String, DeniedCapability)>> = OnceLock::new();
    RULES.get_or_init(|| {
        let literals = DENY_LIST
            .iter()
            .map(|(pattern, capability)| (pattern.to_string(), *capability));
        let modules = DENIED_MODULES.iter().flat_map(|(module, capability)| {
            module_specifier_forms(module)
                .into_iter()
                .map(move |form| (form, *capability))
        });
        literals.chain(modules).collect()
    })
}

/// Outcome of checking one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Safe,
    Rejected {
        pattern: String,
        capability: DeniedCapability,
    },
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, SafetyVerdict::Safe)
    }
}

#[derive(Debug, Clone)]
pub struct SafetyGate {
    extra: Vec<String>,
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SafetyGate {
    /// Gate with the built-in list plus `extra` substrings (blank entries ignored).
    pub fn new(extra: Vec<String>) -> Self {
        Self {
            extra: extra.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    /// First denied substring found in `code`, built-in list first.
    pub fn check(&self, code: &str) -> SafetyVerdict {
        if let Some((pattern, capability)) = builtin_rules()
            .iter()
            .find(|(p, _)| code.contains(p.as_str()))
        {
            return SafetyVerdict::Rejected {
                pattern: pattern.clone(),
                capability: *capability,
            };
        }
        if let Some(pattern) = self.extra.iter().find(|p| code.contains(p.as_str())) {
            return SafetyVerdict::Rejected {
                pattern: pattern.clone(),
                capability: DeniedCapability::Other,
            };
        }
        SafetyVerdict::Safe
    }

    pub fn is_patch_safe(&self, code: &str) -> bool {
        self.check(code).is_safe()
    }
}

/// Check against the built-in list only.
pub fn is_patch_safe(code: &str) -> bool {
    SafetyGate::default().is_patch_safe(code)
}
