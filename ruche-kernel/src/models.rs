use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

/// Fenêtre de récence pour le flag `online` d'un thing (inclusif : un thing vu
/// il y a exactement 10s est encore online).
pub const ONLINE_WINDOW_SECONDS: i64 = 10;

/// État mutable par thing. Créé au boot pour chaque id configuré, jamais
/// supprimé tant que le process tourne. `light_value` survit aux échecs de
/// lecture : on agrège toujours la dernière valeur connue.
#[derive(Debug, Clone)]
pub struct ThingRecord {
    pub thing_id: String,
    pub last_seen: Option<OffsetDateTime>,
    pub light_value: Option<f64>,
    pub raw_properties: Option<Value>,
    pub last_write: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

impl ThingRecord {
    pub fn new(thing_id: &str) -> Self {
        Self {
            thing_id: thing_id.to_string(),
            last_seen: None,
            light_value: None,
            raw_properties: None,
            last_write: None,
            last_error: None,
        }
    }
}

pub type ThingsMap = HashMap<String, ThingRecord>;

/// Entrée de l'agrégateur : l'ordre de la liste porte le tie-break reine.
#[derive(Debug, Clone)]
pub struct ThingReading {
    pub thing_id: String,
    pub light: Option<f64>,
}

/// Résumé flotte recalculé à chaque cycle (remplacement complet).
/// `low_light` est tri-state : None tant qu'aucune moyenne n'est définie.
#[derive(Debug, Clone)]
pub struct FleetSummary {
    pub avg_light: Option<f64>,
    pub low_light: Option<bool>,
    pub queen_thing_id: Option<String>,
    pub reason: String,
    pub computed_at: OffsetDateTime,
}

/// Sorties actionneurs dérivées pour un thing sur un cycle. Éphémère : seul
/// le résultat de l'écriture (ok/erreur) est persisté dans le ThingRecord.
#[derive(Debug, Clone, PartialEq)]
pub struct ThingOutputs {
    pub is_blinking: bool,
    pub led_count: u8,
    pub led_color: bool,
    pub servo_speed: u16,
    pub you_are_the_queen: bool,
}

impl ThingOutputs {
    /// Chaque champ part comme une écriture de propriété indépendante.
    pub fn fields(&self) -> [(&'static str, Value); 5] {
        [
            ("is_blinking", json!(self.is_blinking)),
            ("led_count", json!(self.led_count)),
            ("led_color", json!(self.led_color)),
            ("servo_speed", json!(self.servo_speed)),
            ("you_are_the_queen", json!(self.you_are_the_queen)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct LastSync {
    pub completed_at: OffsetDateTime,
    pub ok: bool,
    pub error: Option<String>,
}

// --- Vues API (timestamps RFC3339, flag online dérivé) ---

#[derive(Debug, Serialize)]
pub struct ThingView {
    pub thing_id: String,
    pub online: bool,
    pub last_seen: Option<String>,
    pub light_value: Option<f64>,
    pub last_write: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FleetSummaryView {
    pub avg_light: Option<f64>,
    pub low_light: Option<bool>,
    pub queen_thing_id: Option<String>,
    pub reason: String,
    pub computed_at: String,
}

#[derive(Debug, Serialize)]
pub struct LastSyncView {
    pub completed_at: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub things: Vec<ThingView>,
    pub summary: Option<FleetSummaryView>,
    pub last_sync: Option<LastSyncView>,
}

fn fmt_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

pub fn thing_view(rec: &ThingRecord, now: OffsetDateTime) -> ThingView {
    let online = rec
        .last_seen
        .map(|seen| now - seen <= Duration::seconds(ONLINE_WINDOW_SECONDS))
        .unwrap_or(false);
    ThingView {
        thing_id: rec.thing_id.clone(),
        online,
        last_seen: rec.last_seen.map(fmt_rfc3339),
        light_value: rec.light_value,
        last_write: rec.last_write.map(fmt_rfc3339),
        last_error: rec.last_error.clone(),
    }
}

pub fn summary_view(summary: &FleetSummary) -> FleetSummaryView {
    FleetSummaryView {
        avg_light: summary.avg_light,
        low_light: summary.low_light,
        queen_thing_id: summary.queen_thing_id.clone(),
        reason: summary.reason.clone(),
        computed_at: fmt_rfc3339(summary.computed_at),
    }
}

pub fn last_sync_view(record: &LastSync) -> LastSyncView {
    LastSyncView {
        completed_at: fmt_rfc3339(record.completed_at),
        ok: record.ok,
        error: record.error.clone(),
    }
}
