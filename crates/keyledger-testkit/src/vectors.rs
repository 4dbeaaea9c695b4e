//! Derivation vectors for cross-platform verification.
//!
//! Every client must derive the same unit key from the same root secret,
//! or records written on one device cannot be read on another. The
//! expected keys below were computed with an independent HKDF-SHA256.

use keyledger_core::{AccountId, EncryptionUnit, RootSecret, Session, UnitKey};
use serde::Serialize;

/// A derivation vector.
#[derive(Debug, Clone, Serialize)]
pub struct DerivationVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Root secret bytes (hex).
    pub root_secret: &'static str,
    /// Unit descriptor, e.g. `presence/2025-Q1`.
    pub unit: &'static str,
    /// Expected unit key (hex).
    pub expected_key: &'static str,
}

const SECRET_42: &str = "4242424242424242424242424242424242424242424242424242424242424242";
const SECRET_COUNTING: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Get all derivation vectors.
pub fn all_vectors() -> Vec<DerivationVector> {
    vec![
        DerivationVector {
            name: "non-temporal scope uses the scope key",
            root_secret: SECRET_42,
            unit: "identity",
            expected_key: "16d54de578cfaedf6b182e2404f785cd7e6e25d77bf0ea872300216ebb401ce9",
        },
        DerivationVector {
            name: "second non-temporal scope",
            root_secret: SECRET_42,
            unit: "documents",
            expected_key: "2a7a76fe943361f67821a75062bd435b87d149b77a00c99c366b76ef3c2a2835",
        },
        DerivationVector {
            name: "presence first quarter",
            root_secret: SECRET_42,
            unit: "presence/2025-Q1",
            expected_key: "89beabdf9cd8e0c2f90d134404ac5beb0abfc72d3bfe98eb531d2e2f08ed8f77",
        },
        DerivationVector {
            name: "presence second quarter",
            root_secret: SECRET_42,
            unit: "presence/2025-Q2",
            expected_key: "5f9c9835f4988b9ebc335e71fd6c5dd1672ead3eaaf45b457918d5e5904e1a35",
        },
        DerivationVector {
            name: "residency shares the label, not the key",
            root_secret: SECRET_42,
            unit: "residency/2025-Q1",
            expected_key: "0edccbb3befd7ed862875fea70820106570164c7f65699c760c9e7c440a9dd5a",
        },
        DerivationVector {
            name: "other root secret",
            root_secret: SECRET_COUNTING,
            unit: "presence/2025-Q1",
            expected_key: "35efbe26bb651d24dcf6b4f570fbeab705f61223eb2ebd58d922f3735b6c93c2",
        },
    ]
}

/// Derive the unit key a vector describes.
pub fn derive_from_vector(vector: &DerivationVector) -> UnitKey {
    let secret = hex::decode(vector.root_secret).expect("vector secret is hex");
    let session = Session::unlock(
        AccountId::new("vectors"),
        RootSecret::from_bytes(secret).expect("vector secret is long enough"),
    );
    let unit: EncryptionUnit = vector.unit.parse().expect("vector unit parses");
    session.unit_key(&unit).expect("session is unlocked")
}

/// Check every vector: `(name, matches, derived hex)`.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let derived = hex::encode(derive_from_vector(v).key().as_bytes());
            (v.name.to_string(), derived == v.expected_key, derived)
        })
        .collect()
}

/// The vectors as JSON, for other implementations to check against.
pub fn vectors_json() -> String {
    serde_json::to_string_pretty(&all_vectors()).expect("vectors serialize")
}
