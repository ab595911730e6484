use std::time::Duration;

/// Configuration du kernel, chargée depuis l'environnement (RUCHE_*).
/// La liste des things est figée au démarrage : pas d'ajout/retrait à chaud.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub things: Vec<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub org_id: Option<String>,
    pub api_base: String,
    pub poll_interval: Duration,
    pub http_port: u16,
    /// Déploiement multi-tenant : l'org id devient obligatoire pour le mode live.
    pub require_org: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            things: Vec::new(),
            client_id: None,
            client_secret: None,
            org_id: None,
            api_base: "https://api2.arduino.cc/iot".to_string(),
            poll_interval: Duration::from_millis(5000),
            http_port: 8080,
            require_org: false,
        }
    }
}

impl KernelConfig {
    /// Lit la configuration depuis les variables d'environnement.
    /// Valeur invalide = fallback sur le défaut avec un warning, jamais de panic.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let things = std::env::var("RUCHE_THINGS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let poll_interval = match std::env::var("RUCHE_POLL_MS") {
            Ok(v) => match v.parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!("RUCHE_POLL_MS invalide ({v}), fallback 5000ms");
                    defaults.poll_interval
                }
            },
            Err(_) => defaults.poll_interval,
        };

        let http_port = std::env::var("RUCHE_HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.http_port);

        Self {
            things,
            client_id: env_nonempty("RUCHE_CLIENT_ID"),
            client_secret: env_nonempty("RUCHE_CLIENT_SECRET"),
            org_id: env_nonempty("RUCHE_ORG_ID"),
            api_base: std::env::var("RUCHE_API_BASE").unwrap_or(defaults.api_base),
            poll_interval,
            http_port,
            require_org: std::env::var("RUCHE_REQUIRE_ORG").map(|v| v == "1").unwrap_or(false),
        }
    }

    /// Mode mock : sans credentials (ou sans org id en multi-tenant), le kernel
    /// tourne de bout en bout avec un gateway simulé au lieu d'échouer au boot.
    pub fn mock_mode(&self) -> bool {
        if self.client_id.is_none() || self.client_secret.is_none() {
            return true;
        }
        self.require_org && self.org_id.is_none()
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
