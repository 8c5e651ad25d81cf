//! Seeded backend producing plausible answers without a dataset.
//!
//! Everything the backend supports is drawn from a [`StdRng`] seeded with
//! the configured seed, so two runs with the same seed and the same
//! attributes answer identically.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::{EvaluationError, LaunchError};
use crate::overrides::AttributeValue;
use crate::uds::{self, NegativeResponseCode, ServiceId, SERVICE_TABLE};

use super::{BackendKind, ResponseDefaults, SyntheticConfig, UdsBackend};

const DEFAULT_SESSION: u8 = 0x01;
const DID_ACTIVE_SESSION: u16 = 0xF186;
const DID_VIN: u16 = 0xF190;
const REPORT_NUMBER_OF_DTC_BY_STATUS_MASK: u8 = 0x01;
const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;
const DTC_FORMAT_ISO14229_1: u8 = 0x01;
const MAX_DTCS: usize = 8;

/// Tunable draw parameters; each maps to one synthetic attribute.
#[derive(Debug, Clone, PartialEq)]
struct Parameters {
    mandatory_sessions: Vec<u8>,
    optional_sessions: Vec<u8>,
    p_session: f64,
    mandatory_services: Vec<ServiceId>,
    optional_services: Vec<ServiceId>,
    p_service: f64,
    p_sub_function: f64,
    p_identifier: f64,
    p_correct_suppress: f64,
    p_dtc_status_byte: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        let mandatory_services = vec![
            ServiceId::DIAGNOSTIC_SESSION_CONTROL,
            ServiceId::ECU_RESET,
            ServiceId::TESTER_PRESENT,
            ServiceId::READ_DATA_BY_IDENTIFIER,
        ];
        let optional_services = SERVICE_TABLE
            .iter()
            .map(|&(_, sid)| sid)
            .filter(|sid| *sid != ServiceId::NEGATIVE_RESPONSE && !mandatory_services.contains(sid))
            .collect();
        Self {
            mandatory_sessions: vec![DEFAULT_SESSION],
            optional_sessions: (0x02..=0x7F).collect(),
            p_session: 0.05,
            mandatory_services,
            optional_services,
            p_service: 0.2,
            p_sub_function: 0.05,
            p_identifier: 0.005,
            p_correct_suppress: 0.9,
            p_dtc_status_byte: 0.9,
        }
    }
}

/// State drawn at setup.
#[derive(Debug)]
struct DrawnState {
    sessions: BTreeSet<u8>,
    services: BTreeMap<u8, BTreeSet<ServiceId>>,
    sub_functions: BTreeMap<ServiceId, BTreeSet<u8>>,
    status_availability: u8,
    dtcs: Vec<(u32, u8)>,
    rng: StdRng,
}

/// Backend deriving its behaviour from a seed.
pub struct SyntheticBackend {
    seed: u64,
    defaults: ResponseDefaults,
    parameters: Parameters,
    state: Option<DrawnState>,
    session: u8,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            seed: config.seed,
            defaults: ResponseDefaults::default(),
            parameters: Parameters::default(),
            state: None,
            session: DEFAULT_SESSION,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn session(&self) -> u8 {
        self.session
    }

    /// Sessions drawn at setup; empty before setup.
    pub fn supported_sessions(&self) -> Vec<u8> {
        self.state
            .as_ref()
            .map(|state| state.sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    fn draw(&self) -> DrawnState {
        let p = &self.parameters;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut sessions: BTreeSet<u8> = p.mandatory_sessions.iter().copied().collect();
        for &session in &p.optional_sessions {
            if rng.gen_bool(p.p_session) {
                sessions.insert(session);
            }
        }

        let mut services = BTreeMap::new();
        for &session in &sessions {
            let mut available: BTreeSet<ServiceId> = p.mandatory_services.iter().copied().collect();
            for &sid in &p.optional_services {
                if rng.gen_bool(p.p_service) {
                    available.insert(sid);
                }
            }
            services.insert(session, available);
        }

        let all_services: BTreeSet<ServiceId> = services.values().flatten().copied().collect();
        let mut sub_functions = BTreeMap::new();
        for sid in all_services.into_iter().filter(|sid| sid.has_sub_function()) {
            let subs = match sid {
                ServiceId::DIAGNOSTIC_SESSION_CONTROL => sessions.clone(),
                _ => {
                    let mut subs: BTreeSet<u8> = base_sub_functions(sid).iter().copied().collect();
                    for sub in 0x01..=0x7F {
                        if rng.gen_bool(p.p_sub_function) {
                            subs.insert(sub);
                        }
                    }
                    subs
                }
            };
            sub_functions.insert(sid, subs);
        }

        let mut status_availability = 0u8;
        for bit in 0..8 {
            if rng.gen_bool(p.p_dtc_status_byte) {
                status_availability |= 1 << bit;
            }
        }
        let dtcs = (0..rng.gen_range(1..=MAX_DTCS))
            .map(|_| (rng.gen::<u32>() & 0x00FF_FFFF, rng.gen::<u8>() & status_availability))
            .collect();

        DrawnState {
            sessions,
            services,
            sub_functions,
            status_availability,
            dtcs,
            rng,
        }
    }

    fn initial_session(&self) -> u8 {
        self.parameters
            .mandatory_sessions
            .first()
            .copied()
            .unwrap_or(DEFAULT_SESSION)
    }

    /// Deterministic per-(seed, service, identifier) draw.
    fn identifier_rng(&self, sid: ServiceId, identifier: u16) -> StdRng {
        let salt = (u64::from(sid.0) << 16) | u64::from(identifier);
        StdRng::seed_from_u64(self.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ salt)
    }

    fn identifier_supported(&self, sid: ServiceId, identifier: u16) -> bool {
        self.identifier_rng(sid, identifier)
            .gen_bool(self.parameters.p_identifier)
    }

    fn vin(&self) -> Vec<u8> {
        format!("VECU{:013X}", self.seed & 0x000F_FFFF_FFFF_FFFF).into_bytes()
    }

    fn read_data_by_identifier(&self, request: &[u8]) -> Vec<u8> {
        let sid = ServiceId::READ_DATA_BY_IDENTIFIER;
        let ids = &request[1..];
        if ids.is_empty() || ids.len() % 2 != 0 {
            return uds::negative_response(
                sid.0,
                NegativeResponseCode::INCORRECT_MESSAGE_LENGTH_OR_INVALID_FORMAT,
            );
        }
        let mut response = vec![uds::positive_sid(sid.0)];
        for pair in ids.chunks_exact(2) {
            let did = u16::from_be_bytes([pair[0], pair[1]]);
            let data = match did {
                DID_ACTIVE_SESSION => vec![self.session],
                DID_VIN => self.vin(),
                _ if self.identifier_supported(sid, did) => {
                    let mut rng = self.identifier_rng(sid, did);
                    (0..4).map(|_| rng.gen::<u8>()).collect()
                }
                _ => {
                    return uds::negative_response(
                        sid.0,
                        NegativeResponseCode::REQUEST_OUT_OF_RANGE,
                    )
                }
            };
            response.extend_from_slice(pair);
            response.extend(data);
        }
        response
    }

    fn routine_control(&self, request: &[u8], sub: u8) -> Vec<u8> {
        let sid = ServiceId::ROUTINE_CONTROL;
        let [_, _, hi, lo, ..] = *request else {
            return uds::negative_response(
                sid.0,
                NegativeResponseCode::INCORRECT_MESSAGE_LENGTH_OR_INVALID_FORMAT,
            );
        };
        if !self.identifier_supported(sid, u16::from_be_bytes([hi, lo])) {
            return uds::negative_response(sid.0, NegativeResponseCode::REQUEST_OUT_OF_RANGE);
        }
        vec![uds::positive_sid(sid.0), sub, hi, lo]
    }

    fn read_dtc_information(state: &DrawnState, request: &[u8], sub: u8) -> Vec<u8> {
        let sid = ServiceId::READ_DTC_INFORMATION;
        let positive = uds::positive_sid(sid.0);
        match sub {
            REPORT_NUMBER_OF_DTC_BY_STATUS_MASK | REPORT_DTC_BY_STATUS_MASK => {
                let Some(&mask) = request.get(2) else {
                    return uds::negative_response(
                        sid.0,
                        NegativeResponseCode::INCORRECT_MESSAGE_LENGTH_OR_INVALID_FORMAT,
                    );
                };
                let matching = state.dtcs.iter().filter(|(_, status)| status & mask != 0);
                let mut response = vec![positive, sub, state.status_availability];
                if sub == REPORT_NUMBER_OF_DTC_BY_STATUS_MASK {
                    let count = matching.count() as u16;
                    response.push(DTC_FORMAT_ISO14229_1);
                    response.extend_from_slice(&count.to_be_bytes());
                } else {
                    for (dtc, status) in matching {
                        response.extend_from_slice(&dtc.to_be_bytes()[1..]);
                        response.push(*status);
                    }
                }
                response
            }
            _ => vec![positive, sub],
        }
    }
}

fn base_sub_functions(sid: ServiceId) -> &'static [u8] {
    match sid {
        ServiceId::ECU_RESET => &[0x01],
        ServiceId::TESTER_PRESENT => &[0x00],
        ServiceId::ROUTINE_CONTROL => &[0x01, 0x02, 0x03],
        ServiceId::READ_DTC_INFORMATION => {
            &[REPORT_NUMBER_OF_DTC_BY_STATUS_MASK, REPORT_DTC_BY_STATUS_MASK]
        }
        _ => &[0x01],
    }
}

fn mismatch(name: &str, expected: &'static str, value: &AttributeValue) -> LaunchError {
    LaunchError::Evaluation {
        attribute: name.to_string(),
        source: EvaluationError::TypeMismatch {
            expected,
            found: format!("a {} value", value.kind()),
        },
    }
}

impl UdsBackend for SyntheticBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Synthetic
    }

    fn defaults(&self) -> &ResponseDefaults {
        &self.defaults
    }

    fn defaults_mut(&mut self) -> &mut ResponseDefaults {
        &mut self.defaults
    }

    fn setup(&mut self) -> Result<(), LaunchError> {
        let state = self.draw();
        info!(
            seed = self.seed,
            sessions = ?state.sessions,
            services = state.services.values().map(BTreeSet::len).max().unwrap_or(0),
            dtcs = state.dtcs.len(),
            "synthetic state drawn"
        );
        self.state = Some(state);
        self.session = self.initial_session();
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), LaunchError> {
        self.state = None;
        self.session = DEFAULT_SESSION;
        Ok(())
    }

    fn supports_service(&self, sid: ServiceId) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.services.values().any(|set| set.contains(&sid)))
    }

    fn supports_sub_function(&self, sid: ServiceId, sub_function: u8) -> bool {
        self.state.as_ref().is_some_and(|state| {
            state
                .sub_functions
                .get(&sid)
                .is_some_and(|subs| subs.contains(&sub_function))
        })
    }

    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let &raw_sid = request.first()?;
        let sid = ServiceId(raw_sid);
        let p_correct_suppress = self.parameters.p_correct_suppress;
        let state = self.state.as_mut()?;

        let in_session = state
            .services
            .get(&self.session)
            .is_some_and(|set| set.contains(&sid));
        if !in_session {
            return Some(uds::negative_response(
                raw_sid,
                NegativeResponseCode::SERVICE_NOT_SUPPORTED_IN_ACTIVE_SESSION,
            ));
        }

        if uds::suppress_positive_response(request) && state.rng.gen_bool(p_correct_suppress) {
            debug!(%sid, "suppressing positive response");
            return None;
        }

        let sub = uds::sub_function(request);
        let response = match (sid, sub) {
            (ServiceId::DIAGNOSTIC_SESSION_CONTROL, Some(session)) => {
                if !state.sessions.contains(&session) {
                    return Some(uds::negative_response(
                        raw_sid,
                        NegativeResponseCode::SUB_FUNCTION_NOT_SUPPORTED,
                    ));
                }
                self.session = session;
                debug!(session, "session changed");
                vec![uds::positive_sid(raw_sid), session, 0x00, 0x32, 0x01, 0xF4]
            }
            (ServiceId::ECU_RESET, Some(kind)) => {
                self.session = self.initial_session();
                vec![uds::positive_sid(raw_sid), kind]
            }
            (ServiceId::TESTER_PRESENT, Some(sub)) => vec![uds::positive_sid(raw_sid), sub],
            (ServiceId::READ_DATA_BY_IDENTIFIER, _) => self.read_data_by_identifier(request),
            (ServiceId::ROUTINE_CONTROL, Some(sub)) => self.routine_control(request, sub),
            (ServiceId::READ_DTC_INFORMATION, Some(sub)) => {
                Self::read_dtc_information(state, request, sub)
            }
            (_, Some(sub)) => {
                let mut echo = vec![uds::positive_sid(raw_sid), sub];
                echo.extend_from_slice(&request[2..]);
                echo
            }
            (_, None) if sid.has_sub_function() => uds::negative_response(
                raw_sid,
                NegativeResponseCode::INCORRECT_MESSAGE_LENGTH_OR_INVALID_FORMAT,
            ),
            (_, None) => {
                let mut echo = vec![uds::positive_sid(raw_sid)];
                echo.extend_from_slice(&request[1..]);
                echo
            }
        };
        Some(response)
    }

    fn apply_specific(&mut self, name: &str, value: AttributeValue) -> Result<(), LaunchError> {
        let p = &mut self.parameters;
        match (name, value) {
            ("mandatory_sessions", AttributeValue::Sessions(v)) if v.is_empty() => {
                return Err(LaunchError::Evaluation {
                    attribute: name.to_string(),
                    source: EvaluationError::OutOfRange {
                        value: "[]".to_string(),
                        expected: "at least one session",
                    },
                })
            }
            ("mandatory_sessions", AttributeValue::Sessions(v)) => p.mandatory_sessions = v,
            ("optional_sessions", AttributeValue::Sessions(v)) => p.optional_sessions = v,
            ("mandatory_services", AttributeValue::Services(v)) => p.mandatory_services = v,
            ("optional_services", AttributeValue::Services(v)) => p.optional_services = v,
            ("p_session", AttributeValue::Probability(v)) => p.p_session = v,
            ("p_service", AttributeValue::Probability(v)) => p.p_service = v,
            ("p_sub_function", AttributeValue::Probability(v)) => p.p_sub_function = v,
            ("p_identifier", AttributeValue::Probability(v)) => p.p_identifier = v,
            ("p_correct_suppress", AttributeValue::Probability(v)) => p.p_correct_suppress = v,
            ("p_dtc_status_byte", AttributeValue::Probability(v)) => p.p_dtc_status_byte = v,
            ("mandatory_sessions" | "optional_sessions", other) => {
                return Err(mismatch(name, "session numbers", &other))
            }
            ("mandatory_services" | "optional_services", other) => {
                return Err(mismatch(name, "service identifiers", &other))
            }
            (
                "p_session" | "p_service" | "p_sub_function" | "p_identifier"
                | "p_correct_suppress" | "p_dtc_status_byte",
                other,
            ) => return Err(mismatch(name, "a probability", &other)),
            _ => {
                return Err(LaunchError::UnknownAttribute {
                    kind: BackendKind::Synthetic,
                    name: name.to_string(),
                })
            }
        }
        Ok(())
    }
}
