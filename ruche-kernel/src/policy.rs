/**
 * POLITIQUE DE SORTIE - Résumé flotte + identité -> sorties actionneurs
 *
 * RÔLE : Décider ce que chaque thing doit afficher : nombre de LEDs, couleur
 * reine, clignotement basse lumière, vitesse du servo.
 *
 * FONCTIONNEMENT : Fonction pure du résumé et de l'id. Les vitesses servo
 * sont des réglages, pas un contrat : seul FAST > SLOW est garanti.
 */

use crate::models::{FleetSummary, ThingOutputs};

pub const LED_COUNT_MAX: u8 = 12;
pub const RAW_LIGHT_MAX: f64 = 1023.0;

/// Vitesse servo en basse lumière (ventilation rapide de la ruche).
pub const SERVO_SPEED_FAST: u16 = 180;
/// Vitesse servo en régime normal.
pub const SERVO_SPEED_SLOW: u16 = 30;

/// Plage valide pour un override manuel de servo_speed.
pub const SERVO_SPEED_MAX: u16 = 180;

pub fn compute_outputs(summary: &FleetSummary, thing_id: &str) -> ThingOutputs {
    let is_queen = summary.queen_thing_id.as_deref() == Some(thing_id);
    // Strict : low_light inconnu (None) ne fait PAS clignoter
    let is_blinking = summary.low_light == Some(true);

    let led_count = summary
        .avg_light
        .map(|avg| {
            let scaled = (avg / RAW_LIGHT_MAX * f64::from(LED_COUNT_MAX)).round();
            (scaled as i64).clamp(0, i64::from(LED_COUNT_MAX)) as u8
        })
        .unwrap_or(0);

    ThingOutputs {
        is_blinking,
        led_count,
        led_color: is_queen,
        servo_speed: if is_blinking { SERVO_SPEED_FAST } else { SERVO_SPEED_SLOW },
        you_are_the_queen: is_queen,
    }
}
