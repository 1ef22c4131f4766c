//! Sequential DTMF auto-navigator for calls linked to an `IvrPath`.

use crate::db::IvrStep;
use crate::webhook::carrier_client::CarrierClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const STEP_DELAY: Duration = Duration::from_secs(3);

/// Walks a path's steps in order, waiting `STEP_DELAY` before each DTMF
/// send. Meant to be spawned as a detached task off `call.answered`.
pub async fn walk_ivr_path(
    carrier: Arc<CarrierClient>,
    call_control_id: String,
    steps: Vec<IvrStep>,
    gathered_info: HashMap<String, String>,
) {
    for step in steps {
        tokio::time::sleep(STEP_DELAY).await;

        let Some(digits) = resolve_digits(&step.action, &gathered_info) else {
            warn!(
                call_control_id = %call_control_id,
                step = step.step,
                action = %step.action,
                "skipping ivr step: no gathered info for action"
            );
            continue;
        };

        match carrier.send_dtmf(&call_control_id, &digits).await {
            Ok(()) => info!(call_control_id = %call_control_id, step = step.step, "sent ivr dtmf"),
            Err(e) => warn!(call_control_id = %call_control_id, step = step.step, error = %e, "failed to send ivr dtmf"),
        }
    }
}

/// `action` is either literal DTMF digits or a key into `gathered_info`.
fn resolve_digits(action: &str, gathered_info: &HashMap<String, String>) -> Option<String> {
    if is_literal_digits(action) {
        Some(action.to_string())
    } else {
        gathered_info.get(action).cloned()
    }
}

fn is_literal_digits(action: &str) -> bool {
    !action.is_empty() && action.chars().all(|c| c.is_ascii_digit() || c == '*' || c == '#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_digits_pass_through() {
        let info = HashMap::new();
        assert_eq!(resolve_digits("1234", &info), Some("1234".to_string()));
        assert_eq!(resolve_digits("*9#", &info), Some("*9#".to_string()));
    }

    #[test]
    fn named_key_resolves_from_gathered_info() {
        let mut info = HashMap::new();
        info.insert("account_number".to_string(), "556677".to_string());
        assert_eq!(
            resolve_digits("account_number", &info),
            Some("556677".to_string())
        );
    }

    #[test]
    fn missing_key_is_skipped() {
        let info = HashMap::new();
        assert_eq!(resolve_digits("account_number", &info), None);
    }
}
