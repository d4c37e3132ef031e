//! KAS-1 author signatures: a WebAuthn ES256 assertion whose challenge is the
//! bundle hash, carried alongside the bundle so it verifies without a server.

pub mod authenticator;
pub mod challenge;
pub mod gate;
pub mod passkey;
pub mod sig;
pub mod signer;
pub mod software;

pub use authenticator::{Authenticator, AuthenticatorError};
pub use challenge::{kas_challenge, kas_challenge_b64, user_handle, ChallengeForm};
pub use passkey::{PasskeyRecord, PasskeyStore};
pub use sig::{is_valid_author_sig, verify_author_sig, AuthorSig, VerifyOptions};
pub use signer::{MemorySigner, PasskeySigner, Signer, SignerConfig};
pub use software::SoftwareAuthenticator;
