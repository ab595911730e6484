use parking_lot::Mutex;
use std::sync::Arc;

use crate::models::{
    last_sync_view, summary_view, thing_view, FleetSummary, LastSync, StateSnapshot, ThingReading,
    ThingRecord, ThingView, ThingsMap,
};
use serde_json::Value;
use time::OffsetDateTime;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// État process-wide de la ruche : records par thing + résumé flotte + dernier sync.
/// Initialisé au boot depuis la config, muté uniquement par l'orchestrateur.
/// Les handlers HTTP ne voient que des vues en lecture (snapshot).
pub struct HiveState {
    /// Ordre configuré des things : c'est lui qui fixe le tie-break de la reine.
    order: Vec<String>,
    things: Shared<ThingsMap>,
    summary: Shared<Option<FleetSummary>>,
    last_sync: Shared<Option<LastSync>>,
}

pub type SharedHiveState = Arc<HiveState>;

impl HiveState {
    pub fn new(thing_ids: &[String]) -> Self {
        let mut map = ThingsMap::new();
        for id in thing_ids {
            map.insert(id.clone(), ThingRecord::new(id));
        }
        Self {
            order: thing_ids.to_vec(),
            things: new_state(map),
            summary: new_state(None),
            last_sync: new_state(None),
        }
    }

    pub fn thing_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn contains(&self, thing_id: &str) -> bool {
        self.order.iter().any(|id| id == thing_id)
    }

    /// Lecture cloud réussie : last_seen maj, erreur effacée.
    /// `light` à None (valeur non parsable) conserve la dernière valeur connue.
    pub fn record_read_ok(&self, thing_id: &str, light: Option<f64>, raw: Value) {
        let mut map = self.things.lock();
        if let Some(rec) = map.get_mut(thing_id) {
            rec.last_seen = Some(OffsetDateTime::now_utc());
            if let Some(v) = light {
                rec.light_value = Some(v);
            }
            rec.raw_properties = Some(raw);
            rec.last_error = None;
        }
    }

    pub fn record_read_err(&self, thing_id: &str, msg: String) {
        let mut map = self.things.lock();
        if let Some(rec) = map.get_mut(thing_id) {
            rec.last_error = Some(msg);
        }
    }

    pub fn record_write_ok(&self, thing_id: &str) {
        let mut map = self.things.lock();
        if let Some(rec) = map.get_mut(thing_id) {
            rec.last_write = Some(OffsetDateTime::now_utc());
        }
    }

    pub fn record_write_err(&self, thing_id: &str, msg: String) {
        let mut map = self.things.lock();
        if let Some(rec) = map.get_mut(thing_id) {
            rec.last_error = Some(msg);
        }
    }

    /// Valeurs de lumière courantes dans l'ordre configuré, y compris celles
    /// retenues d'un cycle précédent quand la lecture vient d'échouer.
    pub fn readings(&self) -> Vec<ThingReading> {
        let map = self.things.lock();
        self.order
            .iter()
            .map(|id| ThingReading {
                thing_id: id.clone(),
                light: map.get(id).and_then(|r| r.light_value),
            })
            .collect()
    }

    /// Remplacement complet du résumé flotte (jamais de merge).
    pub fn set_summary(&self, summary: FleetSummary) {
        *self.summary.lock() = Some(summary);
    }

    pub fn set_last_sync(&self, record: LastSync) {
        *self.last_sync.lock() = Some(record);
    }

    pub fn thing_view(&self, thing_id: &str) -> Option<ThingView> {
        let now = OffsetDateTime::now_utc();
        self.things.lock().get(thing_id).map(|r| thing_view(r, now))
    }

    pub fn thing_views(&self) -> Vec<ThingView> {
        let now = OffsetDateTime::now_utc();
        let map = self.things.lock();
        self.order
            .iter()
            .filter_map(|id| map.get(id))
            .map(|r| thing_view(r, now))
            .collect()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            things: self.thing_views(),
            summary: self.summary.lock().as_ref().map(summary_view),
            last_sync: self.last_sync.lock().as_ref().map(last_sync_view),
        }
    }
}
