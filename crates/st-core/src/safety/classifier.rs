//! Rule evaluation.

use st_common::{SessionId, SessionRecord};
use st_config::SafetyRules;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::debug;

use super::{ProcessCheck, SafetyReason, SafetyRule, SafetyVerdict};
use crate::collect::process::ProcessInspector;
use crate::logging::Stage;

/// Evaluates sessions against the configured rule lists.
///
/// Account, database and application names compare case-insensitively;
/// addresses, OS accounts and process names compare exactly.
#[derive(Debug, Clone)]
pub struct SafetyClassifier {
    system_users: HashSet<String>,
    system_addresses: HashSet<String>,
    protected_databases: HashSet<String>,
    privileged_applications: Vec<String>,
    privileged_os_users: HashSet<String>,
    critical_process_names: HashSet<String>,
}

impl SafetyClassifier {
    pub fn new(rules: &SafetyRules) -> Self {
        let lowered = |items: &[String]| -> HashSet<String> {
            items.iter().map(|s| s.trim().to_lowercase()).collect()
        };
        let exact = |items: &[String]| -> HashSet<String> {
            items.iter().map(|s| s.trim().to_string()).collect()
        };
        Self {
            system_users: lowered(&rules.system_users),
            system_addresses: exact(&rules.system_addresses),
            protected_databases: lowered(&rules.protected_databases),
            privileged_applications: rules
                .privileged_applications
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            privileged_os_users: exact(&rules.privileged_os_users),
            critical_process_names: exact(&rules.critical_process_names),
        }
    }

    /// Classify one session.
    pub fn classify(
        &self,
        record: &SessionRecord,
        own_session: SessionId,
        processes: &dyn ProcessInspector,
    ) -> SafetyVerdict {
        let mut reasons = Vec::new();

        let system_user = self.system_users.contains(&record.username.trim().to_lowercase());
        if system_user {
            reasons.push(SafetyReason {
                rule: SafetyRule::SystemUser,
                message: format!("user {} is a system account", record.username),
            });
        }

        // A listed loopback address is system context for the protected
        // database rule but is not unsafe on its own.
        let client_ip = record.client_ip.trim();
        let listed_address = self.system_addresses.contains(client_ip);
        let system_address = listed_address && !is_loopback(client_ip);
        if system_address {
            reasons.push(SafetyReason {
                rule: SafetyRule::SystemAddress,
                message: format!("client address {} is a system address", record.client_ip),
            });
        }

        // Only in combination with a system-context signal.
        if (system_user || listed_address)
            && self
                .protected_databases
                .contains(&record.database.trim().to_lowercase())
        {
            reasons.push(SafetyReason {
                rule: SafetyRule::ProtectedDatabase,
                message: format!(
                    "database {} is protected and the session has system context",
                    record.database
                ),
            });
        }

        if let Some(app) = &record.application {
            let app_lower = app.to_lowercase();
            if let Some(hit) = self
                .privileged_applications
                .iter()
                .find(|p| app_lower.contains(p.as_str()))
            {
                reasons.push(SafetyReason {
                    rule: SafetyRule::PrivilegedApplication,
                    message: format!("application {} is privileged utility {}", app, hit),
                });
            }
        }

        if record.id == own_session {
            reasons.push(SafetyReason {
                rule: SafetyRule::OwnSession,
                message: "this is the console's own session".to_string(),
            });
        }

        let process = match record.pid {
            None => ProcessCheck::NoPid,
            Some(pid) => match processes.inspect(pid) {
                Ok(info) => {
                    if self.privileged_os_users.contains(info.owner.as_str()) {
                        reasons.push(SafetyReason {
                            rule: SafetyRule::PrivilegedProcess,
                            message: format!(
                                "process {} is owned by privileged account {}",
                                pid, info.owner
                            ),
                        });
                    } else if self.critical_process_names.contains(info.command.as_str()) {
                        reasons.push(SafetyReason {
                            rule: SafetyRule::PrivilegedProcess,
                            message: format!(
                                "process {} is critical appliance process {}",
                                pid, info.command
                            ),
                        });
                    }
                    ProcessCheck::Inspected { info }
                }
                Err(e) => {
                    debug!(stage = %Stage::Classify, session_id = %record.id, %pid, error = %e, "process rule skipped");
                    ProcessCheck::Skipped {
                        reason: e.to_string(),
                    }
                }
            },
        };

        let verdict = SafetyVerdict::new(record.id, reasons, process);
        debug!(
            stage = %Stage::Classify,
            session_id = %record.id,
            safe = verdict.safe,
            reasons = verdict.reasons.len(),
            "session classified"
        );
        verdict
    }
}

fn is_loopback(address: &str) -> bool {
    address.eq_ignore_ascii_case("localhost")
        || address.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
