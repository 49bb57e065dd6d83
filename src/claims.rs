use std::ops::Index;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Trait for accessing standard JWT/OIDC claims
///
/// The claims validator works on any type implementing this trait, so callers
/// holding their own claim structures can reuse the same ordered checks.
pub trait StandardClaims {
    /// Get the issuer (iss) claim
    fn iss(&self) -> Option<&str>;

    /// Get the subject (sub) claim
    fn sub(&self) -> Option<&str>;

    /// Get the audience (aud) claim
    fn aud(&self) -> &[String];

    /// Get the expiration time (exp) claim as a Unix timestamp
    fn exp(&self) -> Option<i64>;

    /// Get the not-before (nbf) claim as a Unix timestamp
    fn nbf(&self) -> Option<i64> {
        None
    }

    /// Get the token type, taken from the JOSE `typ` header or the introspected `token_type`
    fn token_type(&self) -> Option<&str> {
        None
    }
}

/// The RFC 7519 registered claims of a verified token
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisteredClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    /// Audiences, normalised from either a string or an array
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_numeric_date")]
    pub exp: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_numeric_date")]
    pub nbf: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_numeric_date")]
    pub iat: Option<i64>,
    #[serde(skip)]
    pub token_type: Option<String>,
}

impl RegisteredClaims {
    pub(crate) fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

impl StandardClaims for RegisteredClaims {
    fn iss(&self) -> Option<&str> {
        self.iss.as_deref()
    }

    fn sub(&self) -> Option<&str> {
        self.sub.as_deref()
    }

    fn aud(&self) -> &[String] {
        &self.aud
    }

    fn exp(&self) -> Option<i64> {
        self.exp
    }

    fn nbf(&self) -> Option<i64> {
        self.nbf
    }

    fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Audience>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Audience::One(audience)) => vec![audience],
        Some(Audience::Many(audiences)) => audiences,
    })
}

/// NumericDate values may be sent as floats; fractions are truncated.
fn deserialize_numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };

    number
        .as_i64()
        .or_else(|| number.as_f64().map(|seconds| seconds as i64))
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid NumericDate: {number}")))
}

/// Verified claims as a JSON object
///
/// The default claims shape handed to protected handlers. Index it with a
/// claim name; absent claims index to `Value::Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

static NULL: Value = Value::Null;

impl Claims {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    /// Space-delimited `scope` claim split into individual scopes
    pub fn scopes(&self) -> Vec<&str> {
        self.0
            .get("scope")
            .and_then(Value::as_str)
            .map(|scope| scope.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl Index<&str> for Claims {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        self.0.get(name).unwrap_or(&NULL)
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
