//! OCPP 1.6 action registry
//!
//! All action names the protocol defines, with the direction each may be
//! initiated from. An inbound Call whose action is absent from this
//! registry is answered with a `NotSupported` CallError; a known action
//! the dispatcher has no handler for gets `NotImplemented`.

use std::fmt;

/// Every OCPP 1.6 action, charge-point- and central-system-initiated.
///
/// `DataTransfer` is the one action both sides may initiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Authorize,
    BootNotification,
    CancelReservation,
    ChangeAvailability,
    ChangeConfiguration,
    ClearCache,
    ClearChargingProfile,
    DataTransfer,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    GetCompositeSchedule,
    GetConfiguration,
    GetDiagnostics,
    GetLocalListVersion,
    Heartbeat,
    MeterValues,
    RemoteStartTransaction,
    RemoteStopTransaction,
    ReserveNow,
    Reset,
    SendLocalList,
    SetChargingProfile,
    StartTransaction,
    StatusNotification,
    StopTransaction,
    TriggerMessage,
    UnlockConnector,
    UpdateFirmware,
}

impl Action {
    /// Every registered action.
    pub const ALL: &'static [Action] = &[
        Self::Authorize,
        Self::BootNotification,
        Self::CancelReservation,
        Self::ChangeAvailability,
        Self::ChangeConfiguration,
        Self::ClearCache,
        Self::ClearChargingProfile,
        Self::DataTransfer,
        Self::DiagnosticsStatusNotification,
        Self::FirmwareStatusNotification,
        Self::GetCompositeSchedule,
        Self::GetConfiguration,
        Self::GetDiagnostics,
        Self::GetLocalListVersion,
        Self::Heartbeat,
        Self::MeterValues,
        Self::RemoteStartTransaction,
        Self::RemoteStopTransaction,
        Self::ReserveNow,
        Self::Reset,
        Self::SendLocalList,
        Self::SetChargingProfile,
        Self::StartTransaction,
        Self::StatusNotification,
        Self::StopTransaction,
        Self::TriggerMessage,
        Self::UnlockConnector,
        Self::UpdateFirmware,
    ];

    /// The wire-format action name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authorize => "Authorize",
            Self::BootNotification => "BootNotification",
            Self::CancelReservation => "CancelReservation",
            Self::ChangeAvailability => "ChangeAvailability",
            Self::ChangeConfiguration => "ChangeConfiguration",
            Self::ClearCache => "ClearCache",
            Self::ClearChargingProfile => "ClearChargingProfile",
            Self::DataTransfer => "DataTransfer",
            Self::DiagnosticsStatusNotification => "DiagnosticsStatusNotification",
            Self::FirmwareStatusNotification => "FirmwareStatusNotification",
            Self::GetCompositeSchedule => "GetCompositeSchedule",
            Self::GetConfiguration => "GetConfiguration",
            Self::GetDiagnostics => "GetDiagnostics",
            Self::GetLocalListVersion => "GetLocalListVersion",
            Self::Heartbeat => "Heartbeat",
            Self::MeterValues => "MeterValues",
            Self::RemoteStartTransaction => "RemoteStartTransaction",
            Self::RemoteStopTransaction => "RemoteStopTransaction",
            Self::ReserveNow => "ReserveNow",
            Self::Reset => "Reset",
            Self::SendLocalList => "SendLocalList",
            Self::SetChargingProfile => "SetChargingProfile",
            Self::StartTransaction => "StartTransaction",
            Self::StatusNotification => "StatusNotification",
            Self::StopTransaction => "StopTransaction",
            Self::TriggerMessage => "TriggerMessage",
            Self::UnlockConnector => "UnlockConnector",
            Self::UpdateFirmware => "UpdateFirmware",
        }
    }

    /// Look up an action by its wire-format name. Case-sensitive, per spec.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "Authorize" => Some(Self::Authorize),
            "BootNotification" => Some(Self::BootNotification),
            "CancelReservation" => Some(Self::CancelReservation),
            "ChangeAvailability" => Some(Self::ChangeAvailability),
            "ChangeConfiguration" => Some(Self::ChangeConfiguration),
            "ClearCache" => Some(Self::ClearCache),
            "ClearChargingProfile" => Some(Self::ClearChargingProfile),
            "DataTransfer" => Some(Self::DataTransfer),
            "DiagnosticsStatusNotification" => Some(Self::DiagnosticsStatusNotification),
            "FirmwareStatusNotification" => Some(Self::FirmwareStatusNotification),
            "GetCompositeSchedule" => Some(Self::GetCompositeSchedule),
            "GetConfiguration" => Some(Self::GetConfiguration),
            "GetDiagnostics" => Some(Self::GetDiagnostics),
            "GetLocalListVersion" => Some(Self::GetLocalListVersion),
            "Heartbeat" => Some(Self::Heartbeat),
            "MeterValues" => Some(Self::MeterValues),
            "RemoteStartTransaction" => Some(Self::RemoteStartTransaction),
            "RemoteStopTransaction" => Some(Self::RemoteStopTransaction),
            "ReserveNow" => Some(Self::ReserveNow),
            "Reset" => Some(Self::Reset),
            "SendLocalList" => Some(Self::SendLocalList),
            "SetChargingProfile" => Some(Self::SetChargingProfile),
            "StartTransaction" => Some(Self::StartTransaction),
            "StatusNotification" => Some(Self::StatusNotification),
            "StopTransaction" => Some(Self::StopTransaction),
            "TriggerMessage" => Some(Self::TriggerMessage),
            "UnlockConnector" => Some(Self::UnlockConnector),
            "UpdateFirmware" => Some(Self::UpdateFirmware),
        _ => None,
        }
    }

    /// True if a charge point may initiate this action.
    pub fn charge_point_initiated(&self) -> bool {
        matches!(
            self,
            Self::Authorize
                | Self::BootNotification
                | Self::DataTransfer
                | Self::DiagnosticsStatusNotification
                | Self::FirmwareStatusNotification
                | Self::Heartbeat
                | Self::MeterValues
                | Self::StartTransaction
                | Self::StatusNotification
                | Self::StopTransaction
        )
    }

    /// True if the central system may initiate this action.
    pub fn central_system_initiated(&self) -> bool {
        !self.charge_point_initiated() || matches!(self, Self::DataTransfer)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_all_names() {
        assert_eq!(Action::ALL.len(), 28);
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.name()), Some(*action));
        }
    }

    #[test]
    fn unknown_action_not_registered() {
        assert_eq!(Action::from_name("FooBar"), None);
        // Case matters on the wire.
        assert_eq!(Action::from_name("heartbeat"), None);
    }

    #[test]
    fn directions() {
        assert!(Action::Heartbeat.charge_point_initiated());
        assert!(!Action::Heartbeat.central_system_initiated());

        assert!(Action::Reset.central_system_initiated());
        assert!(!Action::Reset.charge_point_initiated());

        // DataTransfer goes both ways.
        assert!(Action::DataTransfer.charge_point_initiated());
        assert!(Action::DataTransfer.central_system_initiated());
    }

    #[test]
    fn direction_split_counts() {
        let inbound = Action::ALL
            .iter()
            .filter(|a| a.charge_point_initiated())
            .count();
        let outbound = Action::ALL
            .iter()
            .filter(|a| a.central_system_initiated())
            .count();
        assert_eq!(inbound, 10);
        assert_eq!(outbound, 19);
    }
}
