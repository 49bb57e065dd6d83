use gatekeep::requirement_fn;
use gatekeep::AnyClaims;
use gatekeep::TokenVerifier;
use gatekeep::VerifierConfig;
use gatekeep::VerifyToken;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct OrderClaims {
    sub: String,
    #[serde(default)]
    scope: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example JWT token (this is just a placeholder - use a real token in practice)
    let header = "Bearer eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9...";

    // Example 1: Simple usage with default settings
    println!("=== Example 1: Simple Usage ===");
    let verifier = TokenVerifier::with_issuer("https://auth.example.com").await?;

    match verifier.verify_authorization(Some(header)).await {
        Ok(claims) => {
            println!("✓ Token verified successfully!");
            println!("  Subject: {}", claims["sub"]);
        }
        Err(e) => {
            eprintln!("✗ Token verification failed: {} ({})", e.public_message(), e);
        }
    }

    println!();

    // Example 2: Audience, token type and cache tuning
    println!("=== Example 2: Custom Configuration ===");
    let config = VerifierConfig::new("https://auth.example.com")
        .with_required_audience("orders-api")
        .with_required_token_type("at+jwt")
        .with_cache_ttl(Duration::from_secs(1800)) // 30 minutes cache
        .with_stale_key_grace(Duration::ZERO) // fail closed once the TTL has passed
        .with_allowed_token_drift(Duration::from_secs(30));

    let verifier = TokenVerifier::new(config, AnyClaims).await?;

    match verifier.verify_authorization(Some(header)).await {
        Ok(claims) => {
            println!("✓ Token verified successfully!");
            println!("  Scopes: {:?}", claims.scopes());
        }
        Err(e) => {
            eprintln!("✗ Token verification failed: {}", e);
        }
    }

    println!();

    // Example 3: Typed claims, a scope requirement and opaque token introspection
    println!("=== Example 3: Typed Claims and Introspection ===");
    let custom_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let config = VerifierConfig::new("https://auth.example.com")
        .with_required_audience("orders-api")
        .with_introspection_credentials("orders-api", "change-me")
        .with_introspection_cache_ttl(Duration::from_secs(30))
        .with_http_client(custom_client);

    let requirement = requirement_fn(|claims: &OrderClaims| {
        if claims.scope.split_whitespace().any(|scope| scope == "orders:read") {
            Ok(())
        } else {
            Err(format!("{} may not read orders", claims.sub).into())
        }
    });

    let verifier = TokenVerifier::new(config, requirement).await?;

    match verifier.verify("2YotnFZFEjr1zCsicMWpAA").await {
        Ok(claims) => {
            println!("✓ Token verified successfully!");
            println!("  Subject: {}", claims.sub);
        }
        Err(e) if e.is_transient() => {
            eprintln!("✗ Authorization server unavailable: {}", e);
        }
        Err(e) => {
            eprintln!("✗ Token verification failed: {}", e);
        }
    }

    verifier.shutdown();

    Ok(())
}
