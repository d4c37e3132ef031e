pub mod bundle;
pub mod capsule;
pub mod owner;
pub mod receipt;
pub mod svg;
pub mod zk;

pub use bundle::{
    build_bundle_root, build_bundle_unsigned, hash_bundle, seal_bundle, verify_bundle_hash,
    verify_capsule_hash, BundleRoot, ProofBundle,
};
pub use capsule::{DayLabel, ProofCapsule};
pub use receipt::SharedReceipt;
