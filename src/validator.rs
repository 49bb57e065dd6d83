use std::time::Duration;

use tracing::debug;

use crate::claims::StandardClaims;
use crate::error::Error;
use crate::error::Result;
use crate::requirement::ClaimsRequirement;

/// Expectations every accepted token must meet
///
/// Built once from the verifier configuration and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Requirements {
    pub issuer: String,
    pub audience: Option<String>,
    pub token_type: Option<String>,
    pub allowed_drift: Duration,
}

/// Checks the standard claims of a decoded token against [`Requirements`]
#[derive(Debug, Clone)]
pub struct ClaimsValidator {
    requirements: Requirements,
}

impl ClaimsValidator {
    pub fn new(requirements: Requirements) -> Self {
        Self { requirements }
    }

    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Check expiry, not-before, issuer, audience and token type, in that order.
    ///
    /// `now` is a Unix timestamp. Requirements that are not configured are
    /// skipped; the first failing check decides the error.
    ///
    /// # Errors
    /// `TokenExpired`, `TokenNotYetValid`, `IssuerMismatch`, `AudienceMismatch`
    /// or `TokenTypeMismatch`.
    pub fn validate<C: StandardClaims + ?Sized>(&self, claims: &C, now: i64) -> Result<()> {
        let drift = i64::try_from(self.requirements.allowed_drift.as_secs()).unwrap_or(i64::MAX);

        if let Some(exp) = claims.exp() {
            if exp.saturating_add(drift) < now {
                return Err(Error::TokenExpired(exp));
            }
        }

        if let Some(nbf) = claims.nbf() {
            if nbf.saturating_sub(drift) > now {
                return Err(Error::TokenNotYetValid(nbf));
            }
        }

        if claims.iss() != Some(self.requirements.issuer.as_str()) {
            return Err(Error::IssuerMismatch(claims.iss().map(str::to_string)));
        }

        if let Some(expected) = &self.requirements.audience {
            if !claims.aud().iter().any(|audience| audience == expected) {
                return Err(Error::AudienceMismatch {
                    expected: expected.clone(),
                    provided: claims.aud().to_vec(),
                });
            }
        }

        if let Some(expected) = &self.requirements.token_type {
            if claims.token_type() != Some(expected.as_str()) {
                return Err(Error::TokenTypeMismatch {
                    expected: expected.clone(),
                    provided: claims.token_type().map(str::to_string),
                });
            }
        }

        debug!(subject = ?claims.sub(), "standard claims accepted");
        Ok(())
    }
}

/// Run a caller-supplied requirement over claims that already passed
/// [`ClaimsValidator::validate`].
///
/// # Errors
/// Returns `Error::RequirementNotMet` carrying the predicate's message.
pub fn check_requirement<R: ClaimsRequirement + ?Sized>(
    requirement: &R,
    claims: &R::Claims,
) -> Result<()> {
    requirement
        .check(claims)
        .map_err(|error| Error::RequirementNotMet(error.to_string()))
}
