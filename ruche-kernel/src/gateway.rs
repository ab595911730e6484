/**
 * GATEWAY PROPRIÉTÉS - Accès cloud aux propriétés des things
 *
 * RÔLE :
 * Lire toutes les propriétés d'un thing et publier une valeur vers une
 * propriété nommée, en résolvant la clé stable (variable_name d'abord,
 * name en secours).
 *
 * FONCTIONNEMENT :
 * - Trait PropertyGateway = contrat commun, choisi UNE fois au boot
 * - CloudGateway = implémentation live (reqwest + bearer token, timeout 10s)
 * - MockGateway = implémentation sans credentials : propriété ldr_value
 *   synthétique, publish sans effet réseau
 *
 * UTILITÉ POUR LA RUCHE :
 * ✅ L'orchestrateur ignore s'il parle au cloud ou au mock
 * ✅ Développement local de bout en bout sans compte cloud
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::KernelConfig;
use crate::token::TokenProvider;

/// Clé stable de la propriété capteur de lumière (lecture seule côté kernel).
pub const LIGHT_PROPERTY: &str = "ldr_value";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Erreurs côté cloud : credentials, échange de token, lectures/écritures.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("cloud credentials missing (client id/secret, or org id in multi-tenant mode)")]
    Credentials,
    #[error("token exchange rejected: status {status}: {body}")]
    Auth { status: u16, body: String },
    #[error("cloud gateway error for thing {thing_id}: status {status}")]
    Gateway { thing_id: String, status: u16 },
    #[error("thing {thing_id} has no property matching '{key}'")]
    UnknownProperty { thing_id: String, key: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Propriété d'un thing telle que vue par le kernel. `value` est la valeur
/// effective : last_value si présente, sinon value courante, sinon null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub name: String,
    pub variable_name: Option<String>,
    pub value: Value,
}

/// Contrat commun live/mock. Sélectionné au démarrage, jamais re-branché.
#[async_trait]
pub trait PropertyGateway: Send + Sync {
    async fn list_properties(&self, thing_id: &str) -> Result<Vec<Property>, CloudError>;
    async fn publish(&self, thing_id: &str, key: &str, value: Value) -> Result<(), CloudError>;
    fn mode(&self) -> &'static str;
}

/// Résolution de clé : variable_name (identifiant stable) prioritaire,
/// name (affichage) en secours.
pub fn resolve_property<'a>(properties: &'a [Property], key: &str) -> Option<&'a Property> {
    properties
        .iter()
        .find(|p| p.variable_name.as_deref() == Some(key))
        .or_else(|| properties.iter().find(|p| p.name == key))
}

/// Extrait la valeur de lumière d'une liste de propriétés, en tolérant les
/// nombres sérialisés en chaîne. None = pas parsable (on retient l'ancienne).
pub fn extract_light(properties: &[Property]) -> Option<f64> {
    let prop = resolve_property(properties, LIGHT_PROPERTY)?;
    match &prop.value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// --- Implémentation live ---

/// Format wire d'une propriété côté cloud.
#[derive(Debug, Deserialize)]
struct RawProperty {
    id: Value,
    name: String,
    variable_name: Option<String>,
    last_value: Option<Value>,
    value: Option<Value>,
}

impl RawProperty {
    fn into_property(self) -> Property {
        let id = match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let value = self
            .last_value
            .filter(|v| !v.is_null())
            .or(self.value)
            .unwrap_or(Value::Null);
        Property { id, name: self.name, variable_name: self.variable_name, value }
    }
}

pub struct CloudGateway {
    api_base: String,
    org_id: Option<String>,
    tokens: Arc<TokenProvider>,
    client: reqwest::Client,
}

impl CloudGateway {
    /// Échoue au boot si le client HTTP ne peut pas se construire : mieux
    /// vaut refuser de démarrer que de tourner sans timeout borné.
    pub fn new(cfg: &KernelConfig, tokens: Arc<TokenProvider>) -> Result<Self, CloudError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            api_base: cfg.api_base.clone(),
            org_id: cfg.org_id.clone(),
            tokens,
            client,
        })
    }

    fn with_org(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.org_id {
            Some(org) => request.header("X-Organization", org),
            None => request,
        }
    }
}

#[async_trait]
impl PropertyGateway for CloudGateway {
    async fn list_properties(&self, thing_id: &str) -> Result<Vec<Property>, CloudError> {
        let token = self.tokens.get_token().await?;
        let url = format!("{}/v2/things/{}/properties", self.api_base, thing_id);
        let response = self
            .with_org(self.client.get(&url).bearer_auth(token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Gateway {
                thing_id: thing_id.to_string(),
                status: status.as_u16(),
            });
        }

        let raw: Vec<RawProperty> = response.json().await?;
        Ok(raw.into_iter().map(RawProperty::into_property).collect())
    }

    async fn publish(&self, thing_id: &str, key: &str, value: Value) -> Result<(), CloudError> {
        let properties = self.list_properties(thing_id).await?;
        let property = resolve_property(&properties, key).ok_or_else(|| {
            CloudError::UnknownProperty {
                thing_id: thing_id.to_string(),
                key: key.to_string(),
            }
        })?;

        let token = self.tokens.get_token().await?;
        let url = format!(
            "{}/v2/things/{}/properties/{}/publish",
            self.api_base, thing_id, property.id
        );
        let response = self
            .with_org(self.client.put(&url).bearer_auth(token))
            .json(&json!({ "value": value }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Gateway {
                thing_id: thing_id.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "cloud"
    }
}

// --- Implémentation mock ---

/// Gateway simulé : une seule propriété ldr_value par thing, dont la valeur
/// fait une marche aléatoire dans 0-1023 pour que les cycles restent vivants.
pub struct MockGateway {
    values: Mutex<HashMap<String, f64>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self { values: Mutex::new(HashMap::new()) }
    }

    fn next_value(&self, thing_id: &str) -> f64 {
        let mut rng = rand::thread_rng();
        let mut values = self.values.lock();
        let entry = values
            .entry(thing_id.to_string())
            .or_insert_with(|| rng.gen_range(0.0..=1023.0));
        *entry = (*entry + rng.gen_range(-25.0..=25.0)).clamp(0.0, 1023.0);
        *entry
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PropertyGateway for MockGateway {
    async fn list_properties(&self, thing_id: &str) -> Result<Vec<Property>, CloudError> {
        Ok(vec![Property {
            id: format!("mock-{thing_id}-ldr"),
            name: "LDR Value".to_string(),
            variable_name: Some(LIGHT_PROPERTY.to_string()),
            value: json!(self.next_value(thing_id)),
        }])
    }

    async fn publish(&self, _thing_id: &str, _key: &str, _value: Value) -> Result<(), CloudError> {
        // Succès sans effet réseau
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "mock"
    }
}

/// Choix de l'implémentation, une fois pour toutes au démarrage.
pub fn select_gateway(
    cfg: &KernelConfig,
    tokens: Arc<TokenProvider>,
) -> Result<Arc<dyn PropertyGateway>, CloudError> {
    if cfg.mock_mode() {
        tracing::warn!("credentials cloud absents : gateway en mode mock");
        Ok(Arc::new(MockGateway::new()))
    } else {
        Ok(Arc::new(CloudGateway::new(cfg, tokens)?))
    }
}
