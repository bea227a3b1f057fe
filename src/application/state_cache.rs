//! In-memory business state for every known charge point
//!
//! Six concurrent maps keyed by charge point ID: identity, liveness,
//! connector telemetry, active transactions (indexed per connector),
//! reservations, and mirrored configuration. All methods take `&self`
//! and are safe to call from any task.
//!
//! Meter accounting follows the charging rules rather than trusting
//! StartTransaction: a `Transaction.Begin` reading always (re)fixes the
//! official start for its connector, otherwise the first reading seen on
//! an unfixed connector becomes the start. The consumed total sums
//! `max(0, last_seen - official_start)` across the transaction's
//! connectors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rust_ocpp::v1_6::types::ReadingContext;
use tracing::debug;

use crate::domain::state::{
    BatteryStatus, ChargePointInfo, ChargePointState, ConfigurationItem, ConnectorState,
    Reservation, Transaction,
};

/// Concurrent cache of charge point business state.
pub struct StateCache {
    infos: DashMap<String, ChargePointInfo>,
    states: DashMap<String, ChargePointState>,
    connectors: DashMap<String, DashMap<u32, ConnectorState>>,
    /// Transactions indexed by each connector they run on. Multi-connector
    /// transactions appear once per connector; writes go back to every
    /// index entry so all views agree.
    transactions: DashMap<String, DashMap<u32, Transaction>>,
    reservations: DashMap<String, DashMap<u32, Reservation>>,
    /// Configuration per charge point, keyed by lowercased key.
    configurations: DashMap<String, DashMap<String, ConfigurationItem>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            infos: DashMap::new(),
            states: DashMap::new(),
            connectors: DashMap::new(),
            transactions: DashMap::new(),
            reservations: DashMap::new(),
            configurations: DashMap::new(),
        }
    }

    // ── Reads ──────────────────────────────────────────────

    pub fn charge_point_info(&self, charge_point_id: &str) -> Option<ChargePointInfo> {
        self.infos.get(charge_point_id).map(|e| e.value().clone())
    }

    pub fn charge_point_state(&self, charge_point_id: &str) -> Option<ChargePointState> {
        self.states.get(charge_point_id).map(|e| e.value().clone())
    }

    pub fn connector_state(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Option<ConnectorState> {
        self.connectors
            .get(charge_point_id)?
            .get(&connector_id)
            .map(|e| e.value().clone())
    }

    pub fn active_transaction(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Option<Transaction> {
        self.transactions
            .get(charge_point_id)?
            .get(&connector_id)
            .map(|e| e.value().clone())
    }

    /// All active transactions of one charge point, deduplicated across
    /// connector index entries.
    pub fn all_active_transactions(&self, charge_point_id: &str) -> Vec<Transaction> {
        let Some(transactions) = self.transactions.get(charge_point_id) else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for entry in transactions.iter() {
            if !seen.contains(&entry.value().transaction_id) {
                seen.push(entry.value().transaction_id);
                out.push(entry.value().clone());
            }
        }
        out
    }

    pub fn reservation(&self, charge_point_id: &str, connector_id: u32) -> Option<Reservation> {
        self.reservations
            .get(charge_point_id)?
            .get(&connector_id)
            .map(|e| e.value().clone())
    }

    pub fn is_online(&self, charge_point_id: &str) -> bool {
        self.states
            .get(charge_point_id)
            .map(|e| e.value().online)
            .unwrap_or(false)
    }

    pub fn connected_charge_points(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|e| e.value().online)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn configuration(
        &self,
        charge_point_id: &str,
        key: &str,
    ) -> Option<ConfigurationItem> {
        self.configurations
            .get(charge_point_id)?
            .get(&key.to_lowercase())
            .map(|e| e.value().clone())
    }

    pub fn all_configurations(&self, charge_point_id: &str) -> Vec<ConfigurationItem> {
        self.configurations
            .get(charge_point_id)
            .map(|configs| configs.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    // ── Identity & liveness ────────────────────────────────

    pub fn update_charge_point_info(&self, info: ChargePointInfo) {
        self.infos.insert(info.charge_point_id.clone(), info);
    }

    pub fn mark_online(&self, charge_point_id: &str) {
        let mut state = self
            .states
            .entry(charge_point_id.to_string())
            .or_insert_with(|| ChargePointState::new(charge_point_id));
        state.online = true;
        state.connected_at = Some(Utc::now());
        state.last_communication_at = Some(Utc::now());
    }

    pub fn mark_offline(&self, charge_point_id: &str) {
        if let Some(mut state) = self.states.get_mut(charge_point_id) {
            state.online = false;
        }
    }

    pub fn touch_communication(&self, charge_point_id: &str) {
        if let Some(mut state) = self.states.get_mut(charge_point_id) {
            state.last_communication_at = Some(Utc::now());
        }
    }

    // ── Connector status ───────────────────────────────────

    /// Insert or merge a connector status. A plain StatusNotification does
    /// not carry telemetry, so richer fields already cached (battery,
    /// instantaneous readings, last meter value, running transaction) are
    /// kept unless the update brings its own.
    pub fn update_connector_status(&self, charge_point_id: &str, mut status: ConnectorState) {
        let connectors = self
            .connectors
            .entry(charge_point_id.to_string())
            .or_default();
        if let Some(existing) = connectors.get(&status.connector_id) {
            let existing = existing.value();
            if status.battery.is_none() {
                status.battery = existing.battery;
            }
            if status.instant_voltage.is_none() && existing.instant_voltage.is_some() {
                status.instant_voltage = existing.instant_voltage;
                status.instant_current = existing.instant_current;
                status.instant_power = existing.instant_power;
            }
            if status.last_meter_value.is_none() {
                status.last_meter_value = existing.last_meter_value;
            }
            if status.current_transaction_id.is_none() {
                status.current_transaction_id = existing.current_transaction_id;
            }
        }
        connectors.insert(status.connector_id, status);
    }

    pub fn update_battery_status(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        battery: BatteryStatus,
    ) {
        let connectors = self
            .connectors
            .entry(charge_point_id.to_string())
            .or_default();
        let mut state = connectors
            .entry(connector_id)
            .or_insert_with(|| ConnectorState::new(connector_id));
        state.battery = Some(battery);
    }

    /// Update instantaneous electrical readings without touching the rest
    /// of the connector state. No-op for connectors never seen before.
    pub fn update_connector_snapshot(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        voltage: Option<f64>,
        current: Option<f64>,
        power: Option<f64>,
    ) {
        let connectors = self
            .connectors
            .entry(charge_point_id.to_string())
            .or_default();
        let Some(mut state) = connectors.get_mut(&connector_id) else {
            return;
        };
        if voltage.is_some() {
            state.instant_voltage = voltage;
        }
        if current.is_some() {
            state.instant_current = current;
        }
        if power.is_some() {
            state.instant_power = power;
        }
    }

    // ── Station-level notifications ────────────────────────

    pub fn update_firmware_status(&self, charge_point_id: &str, status: &str) {
        let mut state = self
            .states
            .entry(charge_point_id.to_string())
            .or_insert_with(|| ChargePointState::new(charge_point_id));
        state.firmware_status = Some(status.to_string());
    }

    pub fn update_diagnostics_status(&self, charge_point_id: &str, status: &str) {
        let mut state = self
            .states
            .entry(charge_point_id.to_string())
            .or_insert_with(|| ChargePointState::new(charge_point_id));
        state.diagnostics_status = Some(status.to_string());
    }

    pub fn update_local_auth_list_version(&self, charge_point_id: &str, version: i32) {
        let mut state = self
            .states
            .entry(charge_point_id.to_string())
            .or_insert_with(|| ChargePointState::new(charge_point_id));
        state.local_auth_list_version = Some(version);
    }

    // ── Transactions ───────────────────────────────────────

    pub fn create_transaction(&self, transaction: Transaction) {
        debug!(
            charge_point_id = transaction.charge_point_id.as_str(),
            transaction_id = transaction.transaction_id,
            "Transaction cached"
        );
        let transactions = self
            .transactions
            .entry(transaction.charge_point_id.clone())
            .or_default();
        for connector_id in &transaction.connector_ids {
            transactions.insert(*connector_id, transaction.clone());
        }
        drop(transactions);

        let connectors = self
            .connectors
            .entry(transaction.charge_point_id.clone())
            .or_default();
        for connector_id in &transaction.connector_ids {
            if let Some(mut state) = connectors.get_mut(connector_id) {
                state.current_transaction_id = Some(transaction.transaction_id);
            }
        }

        metrics::gauge!("ocpp_active_transactions").increment(1.0);
    }

    /// Fold a cumulative meter reading (Wh) into the connector state and
    /// the transaction running on that connector.
    pub fn update_transaction_meter(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        meter_value: i32,
        context: ReadingContext,
    ) {
        let connectors = self
            .connectors
            .entry(charge_point_id.to_string())
            .or_default();
        if let Some(mut state) = connectors.get_mut(&connector_id) {
            state.last_meter_value = Some(meter_value);
        }
        // Sibling readings, needed for the cross-connector total.
        let last_readings: HashMap<u32, i32> = connectors
            .iter()
            .filter_map(|e| e.value().last_meter_value.map(|v| (*e.key(), v)))
            .collect();
        drop(connectors);

        let Some(transactions) = self.transactions.get(charge_point_id) else {
            return;
        };
        let mut tx = match transactions.get(&connector_id) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        if matches!(context, ReadingContext::TransactionBegin) {
            tx.set_official_start(connector_id, meter_value);
        } else if !tx.official_start_set(connector_id) {
            // First reading since the transaction was created; the
            // meterStart from StartTransaction is only a hint.
            tx.set_official_start(connector_id, meter_value);
        }

        let mut total: i64 = 0;
        for cid in &tx.connector_ids {
            let current = if *cid == connector_id {
                meter_value
            } else {
                last_readings.get(cid).copied().unwrap_or(0)
            };
            if let Some(start) = tx.meter_start(*cid) {
                if current >= start {
                    total += i64::from(current - start);
                }
            }
        }
        tx.total_consumed_energy = Some(total);
        tx.last_meter_update_at = Some(Utc::now());
        tx.last_updated = Utc::now();

        for cid in tx.connector_ids.clone() {
            transactions.insert(cid, tx.clone());
        }
    }

    /// Update the sampled charging power of a running transaction.
    pub fn update_transaction_snapshot(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        power: Option<f64>,
    ) {
        let Some(transactions) = self.transactions.get(charge_point_id) else {
            return;
        };
        let mut tx = match transactions.get(&connector_id) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        if power.is_some() {
            tx.current_power = power;
        }
        tx.last_updated = Utc::now();
        for cid in tx.connector_ids.clone() {
            transactions.insert(cid, tx.clone());
        }
    }

    /// Remove a finished transaction from every connector index and clear
    /// the connectors' transaction links. Returns the final transaction
    /// state, if it was known.
    pub fn end_transaction(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
    ) -> Option<Transaction> {
        let ended = {
            let transactions = self.transactions.get(charge_point_id)?;
            let ended = transactions
                .iter()
                .find(|e| e.value().transaction_id == transaction_id)
                .map(|e| e.value().clone())?;
            for connector_id in &ended.connector_ids {
                transactions.remove(connector_id);
            }
            ended
        };

        if let Some(connectors) = self.connectors.get(charge_point_id) {
            for connector_id in &ended.connector_ids {
                if let Some(mut state) = connectors.get_mut(connector_id) {
                    state.current_transaction_id = None;
                }
            }
        }

        metrics::gauge!("ocpp_active_transactions").decrement(1.0);
        Some(ended)
    }

    // ── Reservations ───────────────────────────────────────

    pub fn create_reservation(&self, reservation: Reservation) {
        self.reservations
            .entry(reservation.charge_point_id.clone())
            .or_default()
            .insert(reservation.connector_id, reservation);
    }

    pub fn cancel_reservation(&self, charge_point_id: &str, reservation_id: i32) -> bool {
        let Some(reservations) = self.reservations.get(charge_point_id) else {
            return false;
        };
        let connector_id = reservations
            .iter()
            .find(|e| e.value().reservation_id == reservation_id)
            .map(|e| *e.key());
        match connector_id {
            Some(connector_id) => reservations.remove(&connector_id).is_some(),
            None => false,
        }
    }

    // ── Configuration ──────────────────────────────────────

    /// Cache one configuration key. Lookups are case-insensitive, as
    /// stations differ in the casing they report.
    pub fn update_configuration(&self, charge_point_id: &str, item: ConfigurationItem) {
        self.configurations
            .entry(charge_point_id.to_string())
            .or_default()
            .insert(item.key.to_lowercase(), item);
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state cache type
pub type SharedStateCache = Arc<StateCache>;

/// Create a shared state cache
pub fn create_state_cache() -> SharedStateCache {
    Arc::new(StateCache::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(connector_id: u32, status: &str) -> ConnectorState {
        let mut state = ConnectorState::new(connector_id);
        state.status = status.to_string();
        state
    }

    #[test]
    fn first_reading_becomes_official_start_even_with_plausible_hint() {
        let cache = StateCache::new();
        cache.update_connector_status("CP1", connector(1, "Charging"));
        // StartTransaction claimed meterStart = 500.
        cache.create_transaction(Transaction::new(7, "CP1", 1, "TAG-1", 500, Utc::now()));

        cache.update_transaction_meter("CP1", 1, 100, ReadingContext::SamplePeriodic);
        let tx = cache.active_transaction("CP1", 1).unwrap();
        assert_eq!(tx.meter_start(1), Some(100));
        assert!(tx.official_start_set(1));
        assert_eq!(tx.total_consumed_energy, Some(0));
    }

    #[test]
    fn transaction_begin_always_refixes_the_start() {
        let cache = StateCache::new();
        cache.update_connector_status("CP1", connector(1, "Charging"));
        cache.create_transaction(Transaction::new(7, "CP1", 1, "TAG-1", 0, Utc::now()));

        cache.update_transaction_meter("CP1", 1, 100, ReadingContext::SamplePeriodic);
        cache.update_transaction_meter("CP1", 1, 150, ReadingContext::SamplePeriodic);
        assert_eq!(
            cache.active_transaction("CP1", 1).unwrap().total_consumed_energy,
            Some(50)
        );

        // A late Transaction.Begin resets the baseline.
        cache.update_transaction_meter("CP1", 1, 120, ReadingContext::TransactionBegin);
        assert_eq!(
            cache.active_transaction("CP1", 1).unwrap().meter_start(1),
            Some(120)
        );

        cache.update_transaction_meter("CP1", 1, 150, ReadingContext::SamplePeriodic);
        assert_eq!(
            cache.active_transaction("CP1", 1).unwrap().total_consumed_energy,
            Some(30)
        );
    }

    #[test]
    fn total_sums_across_connectors() {
        let cache = StateCache::new();
        cache.update_connector_status("CP1", connector(1, "Charging"));
        cache.update_connector_status("CP1", connector(2, "Charging"));

        let mut tx = Transaction::new(9, "CP1", 1, "TAG-1", 0, Utc::now());
        tx.connector_ids.push(2);
        cache.create_transaction(tx);

        cache.update_transaction_meter("CP1", 1, 100, ReadingContext::SamplePeriodic);
        cache.update_transaction_meter("CP1", 2, 200, ReadingContext::SamplePeriodic);
        cache.update_transaction_meter("CP1", 1, 150, ReadingContext::SamplePeriodic);

        // (150 - 100) + (200 - 200); both connector views agree.
        assert_eq!(
            cache.active_transaction("CP1", 1).unwrap().total_consumed_energy,
            Some(50)
        );
        assert_eq!(
            cache.active_transaction("CP1", 2).unwrap().total_consumed_energy,
            Some(50)
        );
        assert_eq!(cache.all_active_transactions("CP1").len(), 1);
    }

    #[test]
    fn meter_decreases_never_go_negative() {
        let cache = StateCache::new();
        cache.update_connector_status("CP1", connector(1, "Charging"));
        cache.create_transaction(Transaction::new(3, "CP1", 1, "TAG-1", 0, Utc::now()));

        cache.update_transaction_meter("CP1", 1, 100, ReadingContext::SamplePeriodic);
        // Meter rollback (station glitch): contribution clamps to zero.
        cache.update_transaction_meter("CP1", 1, 40, ReadingContext::SamplePeriodic);
        assert_eq!(
            cache.active_transaction("CP1", 1).unwrap().total_consumed_energy,
            Some(0)
        );
    }

    #[test]
    fn status_update_preserves_richer_cached_fields() {
        let cache = StateCache::new();

        let mut rich = connector(1, "Charging");
        rich.instant_voltage = Some(230.0);
        rich.instant_current = Some(16.0);
        rich.instant_power = Some(3680.0);
        rich.last_meter_value = Some(1200);
        rich.battery = Some(BatteryStatus {
            soc: Some(55.0),
            ..Default::default()
        });
        rich.current_transaction_id = Some(42);
        cache.update_connector_status("CP1", rich);

        // A bare StatusNotification follows.
        cache.update_connector_status("CP1", connector(1, "Finishing"));

        let state = cache.connector_state("CP1", 1).unwrap();
        assert_eq!(state.status, "Finishing");
        assert_eq!(state.instant_voltage, Some(230.0));
        assert_eq!(state.instant_power, Some(3680.0));
        assert_eq!(state.last_meter_value, Some(1200));
        assert_eq!(state.current_transaction_id, Some(42));
        assert_eq!(state.battery.unwrap().soc, Some(55.0));
    }

    #[test]
    fn end_transaction_clears_all_connector_links() {
        let cache = StateCache::new();
        cache.update_connector_status("CP1", connector(1, "Charging"));
        cache.update_connector_status("CP1", connector(2, "Charging"));
        let mut tx = Transaction::new(11, "CP1", 1, "TAG-1", 0, Utc::now());
        tx.connector_ids.push(2);
        cache.create_transaction(tx);

        assert_eq!(
            cache.connector_state("CP1", 1).unwrap().current_transaction_id,
            Some(11)
        );

        let ended = cache.end_transaction("CP1", 11).unwrap();
        assert_eq!(ended.transaction_id, 11);
        assert!(cache.active_transaction("CP1", 1).is_none());
        assert!(cache.active_transaction("CP1", 2).is_none());
        assert_eq!(
            cache.connector_state("CP1", 1).unwrap().current_transaction_id,
            None
        );
        assert!(cache.end_transaction("CP1", 11).is_none());
    }

    #[test]
    fn reservations_cancel_by_id() {
        let cache = StateCache::new();
        cache.create_reservation(Reservation {
            reservation_id: 5,
            charge_point_id: "CP1".to_string(),
            connector_id: 2,
            id_tag: "TAG-9".to_string(),
            expiry_date: Utc::now(),
            parent_id_tag: None,
        });

        assert!(cache.reservation("CP1", 2).is_some());
        assert!(!cache.cancel_reservation("CP1", 99));
        assert!(cache.cancel_reservation("CP1", 5));
        assert!(cache.reservation("CP1", 2).is_none());
    }

    #[test]
    fn configuration_keys_are_case_insensitive() {
        let cache = StateCache::new();
        cache.update_configuration(
            "CP1",
            ConfigurationItem {
                key: "HeartbeatInterval".to_string(),
                value: Some("300".to_string()),
                readonly: false,
            },
        );

        let item = cache.configuration("CP1", "heartbeatinterval").unwrap();
        assert_eq!(item.key, "HeartbeatInterval");
        assert_eq!(item.value.as_deref(), Some("300"));
        assert_eq!(cache.all_configurations("CP1").len(), 1);
    }

    #[test]
    fn online_tracking() {
        let cache = StateCache::new();
        assert!(!cache.is_online("CP1"));

        cache.mark_online("CP1");
        assert!(cache.is_online("CP1"));
        assert_eq!(cache.connected_charge_points(), vec!["CP1".to_string()]);

        cache.mark_offline("CP1");
        assert!(!cache.is_online("CP1"));
        assert!(cache.connected_charge_points().is_empty());
        // State survives offline transitions.
        assert!(cache.charge_point_state("CP1").is_some());
    }
}
