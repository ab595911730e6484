/**
 * ORCHESTRATEUR DE SYNC - Le cycle lecture -> agrégation -> écriture
 *
 * RÔLE :
 * Un cycle lit chaque thing via le gateway, recalcule le résumé flotte,
 * dérive les sorties actionneurs par thing et les publie champ par champ.
 *
 * FONCTIONNEMENT :
 * - Isolation par thing : un échec de lecture/écriture est enregistré sur le
 *   record du thing concerné et ne bloque jamais les autres
 * - Les cycles sont sérialisés par un mutex interne : le poller saute son
 *   tick si un cycle est déjà en vol (file de profondeur zéro)
 * - Le record Last Sync termine toujours en ok : chaque opération faillible
 *   du cycle (lecture, écriture) vit derrière un garde par-thing, le cycle
 *   lui-même n'en contient aucune
 * - Override manuel : validation de TOUS les champs avant la moindre
 *   publication ; un échec gateway en cours de route laisse les champs déjà
 *   publiés appliqués (comportement assumé, pas de rollback)
 */

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::aggregate::compute_summary;
use crate::gateway::{extract_light, CloudError, PropertyGateway, LIGHT_PROPERTY};
use crate::models::{LastSync, StateSnapshot, ThingOutputs};
use crate::policy::{compute_outputs, LED_COUNT_MAX, SERVO_SPEED_MAX};
use crate::state::SharedHiveState;

/// Erreurs d'un override manuel, rapportées en bloc à l'appelant.
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("unknown thing: {0}")]
    UnknownThing(String),
    #[error("field '{0}' is read only")]
    ReadOnly(String),
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
    #[error(transparent)]
    Gateway(#[from] CloudError),
}

#[derive(Debug, Serialize)]
pub struct OverrideOutcome {
    pub thing_id: String,
    pub applied: Map<String, Value>,
}

pub struct SyncEngine {
    state: SharedHiveState,
    gateway: Arc<dyn PropertyGateway>,
    cycle_lock: tokio::sync::Mutex<()>,
}

pub type SharedEngine = Arc<SyncEngine>;

impl SyncEngine {
    pub fn new(state: SharedHiveState, gateway: Arc<dyn PropertyGateway>) -> Self {
        Self { state, gateway, cycle_lock: tokio::sync::Mutex::new(()) }
    }

    /// Un cycle complet. Les syncs concurrents (poller + /sync forcé)
    /// s'attendent mutuellement : jamais deux cycles entrelacés.
    pub async fn sync_once(&self) -> StateSnapshot {
        let _cycle = self.cycle_lock.lock().await;
        self.run_cycle().await
    }

    /// Variante du poller : saute le cycle si un autre est déjà en vol.
    pub async fn try_sync_once(&self) -> Option<StateSnapshot> {
        match self.cycle_lock.try_lock() {
            Ok(_cycle) => Some(self.run_cycle().await),
            Err(_) => {
                debug!("cycle déjà en vol, tick sauté");
                None
            }
        }
    }

    async fn run_cycle(&self) -> StateSnapshot {
        let thing_ids = self.state.thing_ids();

        // 1. Lecture de chaque thing, isolée par thing
        for thing_id in &thing_ids {
            match self.gateway.list_properties(thing_id).await {
                Ok(properties) => {
                    let light = extract_light(&properties);
                    let raw = serde_json::to_value(&properties).unwrap_or(Value::Null);
                    self.state.record_read_ok(thing_id, light, raw);
                }
                Err(e) => {
                    warn!("lecture {thing_id} échouée: {e}");
                    self.state.record_read_err(thing_id, e.to_string());
                }
            }
        }

        // 2. Agrégation sur les valeurs courantes (y compris retenues) et
        //    remplacement complet du résumé
        let readings = self.state.readings();
        let summary = compute_summary(&readings, OffsetDateTime::now_utc());
        info!(
            "résumé flotte: avg={:?} low_light={:?} reine={:?}",
            summary.avg_light, summary.low_light, summary.queen_thing_id
        );
        self.state.set_summary(summary.clone());

        // 3. Écriture des sorties par thing, isolée par thing
        for thing_id in &thing_ids {
            let outputs = compute_outputs(&summary, thing_id);
            match self.push_outputs(thing_id, &outputs).await {
                Ok(()) => self.state.record_write_ok(thing_id),
                Err(e) => {
                    warn!("écriture {thing_id} échouée: {e}");
                    self.state.record_write_err(thing_id, e.to_string());
                }
            }
        }

        // 4. Les gardes par thing absorbent tous les échecs attendus : le
        //    cycle lui-même se termine toujours
        self.state.set_last_sync(LastSync {
            completed_at: OffsetDateTime::now_utc(),
            ok: true,
            error: None,
        });

        self.state.snapshot()
    }

    /// Publie chaque champ comme une écriture indépendante ; le premier champ
    /// en échec interrompt les suivants pour ce thing.
    async fn push_outputs(&self, thing_id: &str, outputs: &ThingOutputs) -> Result<(), CloudError> {
        for (key, value) in outputs.fields() {
            self.gateway.publish(thing_id, key, value).await?;
        }
        Ok(())
    }

    /// Override manuel d'un sous-ensemble de sorties d'un thing.
    pub async fn apply_override(
        &self,
        thing_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<OverrideOutcome, OverrideError> {
        if !self.state.contains(thing_id) {
            return Err(OverrideError::UnknownThing(thing_id.to_string()));
        }

        // Validation complète avant toute publication : une requête invalide
        // ne peut pas s'appliquer partiellement
        let mut validated: Vec<(String, Value)> = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            if key == LIGHT_PROPERTY {
                return Err(OverrideError::ReadOnly(key.clone()));
            }
            validated.push((key.clone(), validate_field(key, value)?));
        }

        for (key, value) in &validated {
            match self.gateway.publish(thing_id, key, value.clone()).await {
                Ok(()) => {}
                Err(e) => {
                    // Les champs déjà publiés restent appliqués
                    self.state.record_write_err(thing_id, e.to_string());
                    return Err(OverrideError::Gateway(e));
                }
            }
        }

        self.state.record_write_ok(thing_id);
        info!("override appliqué sur {thing_id}: {} champ(s)", validated.len());
        Ok(OverrideOutcome {
            thing_id: thing_id.to_string(),
            applied: validated.into_iter().collect(),
        })
    }
}

fn validate_field(key: &str, value: &Value) -> Result<Value, OverrideError> {
    match key {
        "led_count" => int_in_range(key, value, 0, i64::from(LED_COUNT_MAX)),
        "servo_speed" => int_in_range(key, value, 0, i64::from(SERVO_SPEED_MAX)),
        // Les autres champs partent tels quels vers le gateway
        _ => Ok(value.clone()),
    }
}

fn int_in_range(key: &str, value: &Value, min: i64, max: i64) -> Result<Value, OverrideError> {
    // as_i64 refuse les flottants non entiers et tout ce qui n'est pas un nombre
    let n = value.as_i64().ok_or_else(|| OverrideError::Invalid {
        field: key.to_string(),
        reason: format!("expected an integer, got {value}"),
    })?;
    if n < min || n > max {
        return Err(OverrideError::Invalid {
            field: key.to_string(),
            reason: format!("{n} out of range [{min}, {max}]"),
        });
    }
    Ok(Value::from(n))
}

// --- Poller périodique ---

/// Boucle de polling à intervalle fixe avec start/stop. Le flag coupe les
/// ticks sans tuer la task ; le try_lock du moteur évite tout chevauchement.
pub struct Poller {
    running: AtomicBool,
}

pub type SharedPoller = Arc<Poller>;

impl Poller {
    pub fn new() -> Self {
        Self { running: AtomicBool::new(true) }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
        info!("poller démarré");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        info!("poller arrêté");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Démarre la task de polling et rend la poignée start/stop.
    pub fn spawn(engine: SharedEngine, period: Duration) -> SharedPoller {
        let poller = Arc::new(Poller::new());
        let handle = poller.clone();

        tokio::spawn(async move {
            info!("polling toutes les {period:?}");
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if !handle.is_running() {
                    continue;
                }
                if engine.try_sync_once().await.is_none() {
                    warn!("tick sauté : un cycle était encore en cours");
                }
            }
        });

        poller
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Property;
    use crate::state::HiveState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    /// Gateway scripté : valeurs de lumière fixes, échecs de lecture ou
    /// d'écriture par thing, journal des publications.
    struct ScriptedGateway {
        light: HashMap<String, f64>,
        fail_reads: HashSet<String>,
        fail_writes: HashSet<String>,
        published: parking_lot::Mutex<Vec<(String, String, Value)>>,
    }

    impl ScriptedGateway {
        fn new(light: &[(&str, f64)]) -> Self {
            Self {
                light: light.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                fail_reads: HashSet::new(),
                fail_writes: HashSet::new(),
                published: parking_lot::Mutex::new(Vec::new()),
            }
        }

        fn failing_reads(mut self, ids: &[&str]) -> Self {
            self.fail_reads = ids.iter().map(|s| s.to_string()).collect();
            self
        }

        fn failing_writes(mut self, ids: &[&str]) -> Self {
            self.fail_writes = ids.iter().map(|s| s.to_string()).collect();
            self
        }

        fn published_keys(&self, thing_id: &str) -> Vec<String> {
            self.published
                .lock()
                .iter()
                .filter(|(id, _, _)| id == thing_id)
                .map(|(_, key, _)| key.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PropertyGateway for ScriptedGateway {
        async fn list_properties(&self, thing_id: &str) -> Result<Vec<Property>, CloudError> {
            if self.fail_reads.contains(thing_id) {
                return Err(CloudError::Gateway { thing_id: thing_id.to_string(), status: 500 });
            }
            let value = match self.light.get(thing_id) {
                Some(v) => json!(v),
                None => Value::Null, // propriété présente mais valeur non parsable
            };
            Ok(vec![Property {
                id: format!("{thing_id}-ldr"),
                name: "LDR Value".into(),
                variable_name: Some(LIGHT_PROPERTY.into()),
                value,
            }])
        }

        async fn publish(&self, thing_id: &str, key: &str, value: Value) -> Result<(), CloudError> {
            if self.fail_writes.contains(thing_id) {
                return Err(CloudError::Gateway { thing_id: thing_id.to_string(), status: 502 });
            }
            self.published.lock().push((thing_id.to_string(), key.to_string(), value));
            Ok(())
        }

        fn mode(&self) -> &'static str {
            "scripted"
        }
    }

    fn light(state: &SharedHiveState, id: &str) -> Option<f64> {
        state.thing_view(id).unwrap().light_value
    }

    fn state_of(ids: &[&str]) -> SharedHiveState {
        Arc::new(HiveState::new(&ids.iter().map(|s| s.to_string()).collect::<Vec<_>>()))
    }

    fn engine(state: &SharedHiveState, gateway: ScriptedGateway) -> (SyncEngine, Arc<ScriptedGateway>) {
        let gateway = Arc::new(gateway);
        (SyncEngine::new(state.clone(), gateway.clone()), gateway)
    }

    #[tokio::test]
    async fn test_read_failure_is_isolated_per_thing() {
        let state = state_of(&["a", "b"]);

        // Premier cycle : tout passe
        let (eng, _) = engine(&state, ScriptedGateway::new(&[("a", 100.0), ("b", 300.0)]));
        eng.sync_once().await;
        assert_eq!(light(&state, "a"), Some(100.0));

        // Deuxième cycle : a échoue, b continue de vivre
        let (eng, _) = engine(
            &state,
            ScriptedGateway::new(&[("b", 350.0)]).failing_reads(&["a"]),
        );
        let snapshot = eng.sync_once().await;

        assert_eq!(light(&state, "a"), Some(100.0), "valeur retenue malgré l'échec");
        assert!(state.thing_view("a").unwrap().last_error.is_some());
        assert_eq!(light(&state, "b"), Some(350.0));
        assert_eq!(state.thing_view("b").unwrap().last_error, None);

        // La valeur retenue de a participe toujours à l'agrégation
        let summary = snapshot.summary.unwrap();
        assert_eq!(summary.avg_light, Some(225.0));
        assert_eq!(summary.queen_thing_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_unparsable_reading_keeps_previous_value_and_clears_error() {
        let state = state_of(&["a"]);

        let (eng, _) = engine(&state, ScriptedGateway::new(&[("a", 200.0)]));
        eng.sync_once().await;

        // Deuxième cycle : la propriété existe mais sa valeur est null
        let (eng, _) = engine(&state, ScriptedGateway::new(&[]));
        eng.sync_once().await;

        let view = state.thing_view("a").unwrap();
        assert_eq!(light(&state, "a"), Some(200.0));
        assert_eq!(view.last_error, None);
        assert!(view.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_write_failure_recorded_without_blocking_others() {
        let state = state_of(&["a", "b"]);
        let (eng, gw) = engine(
            &state,
            ScriptedGateway::new(&[("a", 100.0), ("b", 300.0)]).failing_writes(&["a"]),
        );
        eng.sync_once().await;

        assert!(state.thing_view("a").unwrap().last_error.is_some());
        assert_eq!(state.thing_view("a").unwrap().last_write, None);
        assert!(state.thing_view("b").unwrap().last_write.is_some());

        // b a reçu ses cinq champs de sortie
        assert_eq!(gw.published_keys("b").len(), 5);
        assert!(gw.published_keys("a").is_empty());
    }

    #[tokio::test]
    async fn test_cycle_records_last_sync() {
        let state = state_of(&["a"]);
        let (eng, _) = engine(&state, ScriptedGateway::new(&[("a", 500.0)]));
        let snapshot = eng.sync_once().await;
        let last = snapshot.last_sync.unwrap();
        assert!(last.ok);
        assert_eq!(last.error, None);

        // Les échecs par-thing sont absorbés par les gardes : le cycle
        // se termine et reste ok
        let (eng, _) = engine(
            &state,
            ScriptedGateway::new(&[]).failing_reads(&["a"]).failing_writes(&["a"]),
        );
        let last = eng.sync_once().await.last_sync.unwrap();
        assert!(last.ok);
        assert_eq!(last.error, None);
    }

    #[tokio::test]
    async fn test_override_rejects_unknown_thing() {
        let state = state_of(&["a"]);
        let (eng, _) = engine(&state, ScriptedGateway::new(&[]));
        let err = eng.apply_override("ghost", &Map::new()).await.unwrap_err();
        assert!(matches!(err, OverrideError::UnknownThing(_)));
    }

    #[tokio::test]
    async fn test_override_rejects_read_only_light_field() {
        let state = state_of(&["a"]);
        let (eng, gw) = engine(&state, ScriptedGateway::new(&[]));

        let mut fields = Map::new();
        fields.insert("led_count".into(), json!(3));
        fields.insert("ldr_value".into(), json!(999));

        let err = eng.apply_override("a", &fields).await.unwrap_err();
        assert!(matches!(err, OverrideError::ReadOnly(_)));
        // Rien ne doit être parti : la validation précède toute publication
        assert!(gw.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_override_validation_matrix() {
        let state = state_of(&["a"]);
        let (eng, gw) = engine(&state, ScriptedGateway::new(&[]));

        for (key, value) in [
            ("led_count", json!(15)),
            ("led_count", json!("abc")),
            ("led_count", json!(7.5)),
            ("servo_speed", json!(200)),
            ("servo_speed", json!(-1)),
        ] {
            let mut fields = Map::new();
            fields.insert(key.to_string(), value);
            let err = eng.apply_override("a", &fields).await.unwrap_err();
            assert!(matches!(err, OverrideError::Invalid { .. }), "{key} aurait dû être rejeté");
        }
        assert!(gw.published.lock().is_empty());

        // Valeurs valides acceptées telles quelles
        let mut fields = Map::new();
        fields.insert("led_count".into(), json!(7));
        fields.insert("is_blinking".into(), json!(true));
        let outcome = eng.apply_override("a", &fields).await.unwrap();
        assert_eq!(outcome.applied.get("led_count"), Some(&json!(7)));
        assert_eq!(gw.published.lock().len(), 2);
        assert!(state.thing_view("a").unwrap().last_write.is_some());
    }

    #[tokio::test]
    async fn test_override_gateway_failure_surfaces_and_is_recorded() {
        let state = state_of(&["a"]);
        let (eng, _) = engine(&state, ScriptedGateway::new(&[]).failing_writes(&["a"]));

        let mut fields = Map::new();
        fields.insert("servo_speed".into(), json!(90));
        let err = eng.apply_override("a", &fields).await.unwrap_err();
        assert!(matches!(err, OverrideError::Gateway(_)));
        assert!(state.thing_view("a").unwrap().last_error.is_some());
    }

    #[test]
    fn test_poller_flag_start_stop() {
        let poller = Poller::new();
        assert!(poller.is_running());
        poller.stop();
        assert!(!poller.is_running());
        poller.start();
        assert!(poller.is_running());
    }
}
