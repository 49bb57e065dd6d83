use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::claims::Claims;

/// Error type returned by requirement predicates
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Trait for domain-specific checks over verified claims
///
/// Implementations choose the claims shape the token payload is decoded
/// into, which is also the shape the verifier hands back to the caller.
/// `check` runs only after signature (or introspection) and every standard
/// claim check have passed; an error rejects the token.
pub trait ClaimsRequirement: Send + Sync {
    /// The claims structure tokens are decoded into
    ///
    /// Must be `DeserializeOwned` to be decoded from a token payload or an
    /// introspection response, and `Send` for use in async contexts.
    type Claims: DeserializeOwned + Send;

    /// Accept or reject the decoded claims
    fn check(&self, claims: &Self::Claims) -> Result<(), BoxError>;
}

/// Requirement that accepts every token and decodes claims as [`Claims`]
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyClaims;

impl ClaimsRequirement for AnyClaims {
    type Claims = Claims;

    fn check(&self, _claims: &Self::Claims) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Requirement backed by a closure, see [`requirement_fn`]
pub struct RequirementFn<C, F> {
    predicate: F,
    _claims: PhantomData<fn(&C)>,
}

/// Wrap a closure over typed claims into a [`ClaimsRequirement`]
///
/// ```rust
/// use gatekeep::{requirement_fn, Claims};
///
/// let requirement = requirement_fn(|claims: &Claims| {
///     if claims.scopes().contains(&"orders:read") {
///         Ok(())
///     } else {
///         Err("missing scope orders:read".into())
///     }
/// });
/// # let _ = requirement;
/// ```
pub fn requirement_fn<C, F>(predicate: F) -> RequirementFn<C, F>
where
    C: DeserializeOwned + Send,
    F: Fn(&C) -> Result<(), BoxError> + Send + Sync,
{
    RequirementFn {
        predicate,
        _claims: PhantomData,
    }
}

impl<C, F> ClaimsRequirement for RequirementFn<C, F>
where
    C: DeserializeOwned + Send,
    F: Fn(&C) -> Result<(), BoxError> + Send + Sync,
{
    type Claims = C;

    fn check(&self, claims: &C) -> Result<(), BoxError> {
        (self.predicate)(claims)
    }
}
