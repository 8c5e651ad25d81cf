use std::fmt;

use serde::{Deserialize, Serialize};

/// A UDS / OBD service identifier.
///
/// Known identifiers have a symbolic name in [`SERVICE_TABLE`]; unknown
/// values are still representable so raw requests can be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u8);

impl ServiceId {
    pub const SHOW_CURRENT_DATA: Self = Self(0x01);
    pub const SHOW_FREEZE_FRAME_DATA: Self = Self(0x02);
    pub const SHOW_EMISSION_RELATED_DTCS: Self = Self(0x03);
    pub const CLEAR_EMISSION_RELATED_DTCS: Self = Self(0x04);
    pub const SHOW_OXYGEN_SENSOR_MONITORING_TEST_RESULTS: Self = Self(0x05);
    pub const SHOW_ON_BOARD_MONITORING_TEST_RESULTS: Self = Self(0x06);
    pub const SHOW_PENDING_EMISSION_RELATED_DTCS: Self = Self(0x07);
    pub const CONTROL_OPERATION_OF_ON_BOARD_SYSTEM: Self = Self(0x08);
    pub const REQUEST_VEHICLE_INFORMATION: Self = Self(0x09);
    pub const SHOW_PERMANENT_DTCS: Self = Self(0x0A);
    pub const DIAGNOSTIC_SESSION_CONTROL: Self = Self(0x10);
    pub const ECU_RESET: Self = Self(0x11);
    pub const CLEAR_DIAGNOSTIC_INFORMATION: Self = Self(0x14);
    pub const READ_DTC_INFORMATION: Self = Self(0x19);
    pub const READ_DATA_BY_IDENTIFIER: Self = Self(0x22);
    pub const READ_MEMORY_BY_ADDRESS: Self = Self(0x23);
    pub const READ_SCALING_DATA_BY_IDENTIFIER: Self = Self(0x24);
    pub const SECURITY_ACCESS: Self = Self(0x27);
    pub const COMMUNICATION_CONTROL: Self = Self(0x28);
    pub const AUTHENTICATION: Self = Self(0x29);
    pub const READ_DATA_BY_PERIODIC_IDENTIFIER: Self = Self(0x2A);
    pub const DYNAMICALLY_DEFINE_DATA_IDENTIFIER: Self = Self(0x2C);
    pub const WRITE_DATA_BY_IDENTIFIER: Self = Self(0x2E);
    pub const INPUT_OUTPUT_CONTROL_BY_IDENTIFIER: Self = Self(0x2F);
    pub const ROUTINE_CONTROL: Self = Self(0x31);
    pub const REQUEST_DOWNLOAD: Self = Self(0x34);
    pub const REQUEST_UPLOAD: Self = Self(0x35);
    pub const TRANSFER_DATA: Self = Self(0x36);
    pub const REQUEST_TRANSFER_EXIT: Self = Self(0x37);
    pub const REQUEST_FILE_TRANSFER: Self = Self(0x38);
    pub const WRITE_MEMORY_BY_ADDRESS: Self = Self(0x3D);
    pub const TESTER_PRESENT: Self = Self(0x3E);
    pub const NEGATIVE_RESPONSE: Self = Self(0x7F);
    pub const ACCESS_TIMING_PARAMETER: Self = Self(0x83);
    pub const SECURED_DATA_TRANSMISSION: Self = Self(0x84);
    pub const CONTROL_DTC_SETTING: Self = Self(0x85);
    pub const RESPONSE_ON_EVENT: Self = Self(0x86);
    pub const LINK_CONTROL: Self = Self(0x87);

    /// Resolve a symbolic service name. This is the evaluator's only lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        SERVICE_TABLE
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, id)| *id)
    }

    /// Symbolic name, if the identifier is part of the table.
    pub fn name(self) -> Option<&'static str> {
        SERVICE_TABLE
            .iter()
            .find(|(_, id)| *id == self)
            .map(|(name, _)| *name)
    }

    /// Services whose second request byte is a sub-function.
    pub fn has_sub_function(self) -> bool {
        matches!(
            self,
            Self::DIAGNOSTIC_SESSION_CONTROL
                | Self::ECU_RESET
                | Self::READ_DTC_INFORMATION
                | Self::SECURITY_ACCESS
                | Self::COMMUNICATION_CONTROL
                | Self::AUTHENTICATION
                | Self::DYNAMICALLY_DEFINE_DATA_IDENTIFIER
                | Self::ROUTINE_CONTROL
                | Self::TESTER_PRESENT
                | Self::ACCESS_TIMING_PARAMETER
                | Self::CONTROL_DTC_SETTING
                | Self::RESPONSE_ON_EVENT
                | Self::LINK_CONTROL
        )
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:02x})", self.0),
            None => write!(f, "0x{:02x}", self.0),
        }
    }
}

/// Every named service identifier.
pub const SERVICE_TABLE: &[(&str, ServiceId)] = &[
    ("ShowCurrentData", ServiceId::SHOW_CURRENT_DATA),
    ("ShowFreezeFrameData", ServiceId::SHOW_FREEZE_FRAME_DATA),
    ("ShowEmissionRelatedDTCs", ServiceId::SHOW_EMISSION_RELATED_DTCS),
    ("ClearEmissionRelatedDTCs", ServiceId::CLEAR_EMISSION_RELATED_DTCS),
    (
        "ShowOxygenSensorMonitoringTestResults",
        ServiceId::SHOW_OXYGEN_SENSOR_MONITORING_TEST_RESULTS,
    ),
    (
        "ShowOnBoardMonitoringTestResults",
        ServiceId::SHOW_ON_BOARD_MONITORING_TEST_RESULTS,
    ),
    (
        "ShowPendingEmissionRelatedDTCs",
        ServiceId::SHOW_PENDING_EMISSION_RELATED_DTCS,
    ),
    (
        "ControlOperationOfOnBoardSystem",
        ServiceId::CONTROL_OPERATION_OF_ON_BOARD_SYSTEM,
    ),
    ("RequestVehicleInformation", ServiceId::REQUEST_VEHICLE_INFORMATION),
    ("ShowPermanentDTCs", ServiceId::SHOW_PERMANENT_DTCS),
    ("DiagnosticSessionControl", ServiceId::DIAGNOSTIC_SESSION_CONTROL),
    ("EcuReset", ServiceId::ECU_RESET),
    ("ClearDiagnosticInformation", ServiceId::CLEAR_DIAGNOSTIC_INFORMATION),
    ("ReadDTCInformation", ServiceId::READ_DTC_INFORMATION),
    ("ReadDataByIdentifier", ServiceId::READ_DATA_BY_IDENTIFIER),
    ("ReadMemoryByAddress", ServiceId::READ_MEMORY_BY_ADDRESS),
    ("ReadScalingDataByIdentifier", ServiceId::READ_SCALING_DATA_BY_IDENTIFIER),
    ("SecurityAccess", ServiceId::SECURITY_ACCESS),
    ("CommunicationControl", ServiceId::COMMUNICATION_CONTROL),
    ("Authentication", ServiceId::AUTHENTICATION),
    (
        "ReadDataByPeriodicIdentifier",
        ServiceId::READ_DATA_BY_PERIODIC_IDENTIFIER,
    ),
    (
        "DynamicallyDefineDataIdentifier",
        ServiceId::DYNAMICALLY_DEFINE_DATA_IDENTIFIER,
    ),
    ("WriteDataByIdentifier", ServiceId::WRITE_DATA_BY_IDENTIFIER),
    (
        "InputOutputControlByIdentifier",
        ServiceId::INPUT_OUTPUT_CONTROL_BY_IDENTIFIER,
    ),
    ("RoutineControl", ServiceId::ROUTINE_CONTROL),
    ("RequestDownload", ServiceId::REQUEST_DOWNLOAD),
    ("RequestUpload", ServiceId::REQUEST_UPLOAD),
    ("TransferData", ServiceId::TRANSFER_DATA),
    ("RequestTransferExit", ServiceId::REQUEST_TRANSFER_EXIT),
    ("RequestFileTransfer", ServiceId::REQUEST_FILE_TRANSFER),
    ("WriteMemoryByAddress", ServiceId::WRITE_MEMORY_BY_ADDRESS),
    ("TesterPresent", ServiceId::TESTER_PRESENT),
    ("NegativeResponse", ServiceId::NEGATIVE_RESPONSE),
    ("AccessTimingParameter", ServiceId::ACCESS_TIMING_PARAMETER),
    ("SecuredDataTransmission", ServiceId::SECURED_DATA_TRANSMISSION),
    ("ControlDTCSetting", ServiceId::CONTROL_DTC_SETTING),
    ("ResponseOnEvent", ServiceId::RESPONSE_ON_EVENT),
    ("LinkControl", ServiceId::LINK_CONTROL),
];
