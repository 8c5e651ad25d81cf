use tracing::trace;

use crate::error::{EvaluationError, LaunchError};
use crate::overrides::{AttributeValue, ServiceToggle};
use crate::uds::{self, NegativeResponseCode, ServiceId};

use super::{BackendKind, UdsBackend};

/// Universal default-response toggles.
///
/// Every toggle defaults to [`ServiceToggle::Always`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseDefaults {
    pub service_not_supported: ServiceToggle,
    pub missing_sub_function: ServiceToggle,
    pub sub_function_not_supported: ServiceToggle,
    pub suppress: ServiceToggle,
    pub none: ServiceToggle,
}

impl ResponseDefaults {
    pub(crate) fn apply(
        &mut self,
        kind: BackendKind,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), LaunchError> {
        let slot = match name {
            "use_default_response_if_service_not_supported" => &mut self.service_not_supported,
            "use_default_response_if_missing_sub_function" => &mut self.missing_sub_function,
            "use_default_response_if_sub_function_not_supported" => {
                &mut self.sub_function_not_supported
            }
            "use_default_response_if_suppress" => &mut self.suppress,
            "use_default_response_if_none" => &mut self.none,
            _ => {
                return Err(LaunchError::UnknownAttribute {
                    kind,
                    name: name.to_string(),
                })
            }
        };
        match value {
            AttributeValue::Toggle(toggle) => {
                *slot = toggle;
                Ok(())
            }
            other => Err(LaunchError::Evaluation {
                attribute: name.to_string(),
                source: EvaluationError::TypeMismatch {
                    expected: "a toggle",
                    found: format!("a {} value", other.kind()),
                },
            }),
        }
    }
}

/// Default-response pipeline shared by every backend.
pub(super) fn handle_request<B: UdsBackend + ?Sized>(
    backend: &mut B,
    request: &[u8],
) -> Option<Vec<u8>> {
    let &raw_sid = request.first()?;
    let sid = ServiceId(raw_sid);
    let defaults = backend.defaults();

    if defaults.service_not_supported.applies_to(sid) && !backend.supports_service(sid) {
        trace!(%sid, "default response: service not supported");
        return Some(uds::negative_response(
            raw_sid,
            NegativeResponseCode::SERVICE_NOT_SUPPORTED,
        ));
    }

    if sid.has_sub_function() {
        match uds::sub_function(request) {
            None if defaults.missing_sub_function.applies_to(sid) => {
                trace!(%sid, "default response: missing sub-function");
                return Some(uds::negative_response(
                    raw_sid,
                    NegativeResponseCode::INCORRECT_MESSAGE_LENGTH_OR_INVALID_FORMAT,
                ));
            }
            Some(sub)
                if defaults.sub_function_not_supported.applies_to(sid)
                    && !backend.supports_sub_function(sid, sub) =>
            {
                trace!(%sid, sub, "default response: sub-function not supported");
                return Some(uds::negative_response(
                    raw_sid,
                    NegativeResponseCode::SUB_FUNCTION_NOT_SUPPORTED,
                ));
            }
            _ => {}
        }
    }

    let suppress = defaults.suppress.applies_to(sid) && uds::suppress_positive_response(request);
    let reject_silence = defaults.none.applies_to(sid);

    match backend.respond(request) {
        Some(response) if suppress && uds::is_positive_response(raw_sid, &response) => {
            trace!(%sid, "default response: positive response suppressed");
            None
        }
        Some(response) => Some(response),
        None if reject_silence => Some(uds::negative_response(
            raw_sid,
            NegativeResponseCode::GENERAL_REJECT,
        )),
        None => None,
    }
}
