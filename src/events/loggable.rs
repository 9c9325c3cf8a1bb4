use serde::{Deserialize, Serialize};

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Removals and failed reloads
    Critical,
    #[default]
    Important,
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Anything that can be written to the policy audit trail.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of event names, e.g. `policy` in `policy.node_added`
    fn entity_type() -> &'static str;

    /// What the event is about: a group path, a rank group, a file
    fn subject(&self) -> String;

    /// Policy fingerprint after the change
    fn fingerprint(&self) -> String;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "node_removed" | "rank_deleted" | "reload_failed" => Severity::Critical,
            _ => self.severity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Dummy;

    impl Loggable for Dummy {
        fn entity_type() -> &'static str {
            "dummy"
        }

        fn subject(&self) -> String {
            "nomad".into()
        }

        fn fingerprint(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn removals_are_critical() {
        assert_eq!(Dummy.severity_for_action("node_removed"), Severity::Critical);
        assert_eq!(Dummy.severity_for_action("node_added"), Severity::Important);
        assert_eq!(Severity::default().as_str(), "important");
    }
}
