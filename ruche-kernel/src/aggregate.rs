/**
 * AGRÉGATEUR FLOTTE - Lectures par thing -> résumé global de la ruche
 *
 * RÔLE : Transformer la liste des valeurs de lumière en décision de flotte :
 * moyenne, flag basse lumière, élection de la reine.
 *
 * FONCTIONNEMENT : Fonction pure. Même liste d'entrée (ordre compris, pour le
 * tie-break) => même résumé. Les valeurs absentes ou NaN sont ignorées.
 */

use crate::models::{FleetSummary, ThingReading};
use time::OffsetDateTime;

/// Seuil basse lumière sur l'échelle brute 0-1023.
pub const LOW_LIGHT_THRESHOLD: f64 = 200.0;

/// Raison affichée quand aucun thing n'a de valeur numérique.
pub const NO_DATA_REASON: &str = "no light reading available";

pub fn compute_summary(readings: &[ThingReading], now: OffsetDateTime) -> FleetSummary {
    let numeric: Vec<(&str, f64)> = readings
        .iter()
        .filter_map(|r| {
            r.light
                .filter(|v| !v.is_nan())
                .map(|v| (r.thing_id.as_str(), v))
        })
        .collect();

    let avg_light = if numeric.is_empty() {
        None
    } else {
        Some(numeric.iter().map(|(_, v)| v).sum::<f64>() / numeric.len() as f64)
    };

    let low_light = avg_light.map(|avg| avg < LOW_LIGHT_THRESHOLD);

    // Élection de la reine : premier maximum strict dans l'ordre d'entrée.
    // Une égalité plus tard dans la liste ne détrône pas la reine en place.
    let mut queen: Option<(&str, f64)> = None;
    for (id, v) in &numeric {
        let beats = queen.map(|(_, best)| *v > best).unwrap_or(true);
        if beats {
            queen = Some((id, *v));
        }
    }

    let (queen_thing_id, reason) = match queen {
        Some((id, v)) => (
            Some(id.to_string()),
            format!("{id} has the brightest reading ({v})"),
        ),
        None => (None, NO_DATA_REASON.to_string()),
    };

    FleetSummary {
        avg_light,
        low_light,
        queen_thing_id,
        reason,
        computed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(id: &str, light: Option<f64>) -> ThingReading {
        ThingReading { thing_id: id.to_string(), light }
    }

    fn summarize(readings: &[ThingReading]) -> FleetSummary {
        compute_summary(readings, OffsetDateTime::now_utc())
    }

    #[test]
    fn test_average_is_mean_of_numeric_values_only() {
        let s = summarize(&[
            reading("a", Some(100.0)),
            reading("b", None),
            reading("c", Some(300.0)),
            reading("d", Some(f64::NAN)),
        ]);
        assert_eq!(s.avg_light, Some(200.0));
    }

    #[test]
    fn test_empty_readings_yield_unknown_everything() {
        let s = summarize(&[reading("a", None), reading("b", Some(f64::NAN))]);
        assert_eq!(s.avg_light, None);
        assert_eq!(s.low_light, None);
        assert_eq!(s.queen_thing_id, None);
        assert_eq!(s.reason, NO_DATA_REASON);
    }

    #[test]
    fn test_low_light_is_strictly_below_threshold() {
        let s = summarize(&[reading("a", Some(199.9))]);
        assert_eq!(s.low_light, Some(true));

        let s = summarize(&[reading("a", Some(200.0))]);
        assert_eq!(s.low_light, Some(false));

        let s = summarize(&[reading("a", Some(1000.0))]);
        assert_eq!(s.low_light, Some(false));
    }

    #[test]
    fn test_queen_first_strict_max_wins_ties() {
        let s = summarize(&[
            reading("a", Some(100.0)),
            reading("b", Some(300.0)),
            reading("c", Some(300.0)),
        ]);
        assert_eq!(s.queen_thing_id.as_deref(), Some("b"));
        assert!(s.reason.contains("300"));
    }

    #[test]
    fn test_queen_ignores_things_without_values() {
        let s = summarize(&[reading("a", None), reading("b", Some(42.0))]);
        assert_eq!(s.queen_thing_id.as_deref(), Some("b"));
    }
}
