//! ActivityPub federation module
//!
//! Handles:
//! - Request signing and HTTP Signature verification
//! - Remote actor resolution
//! - Inbox processing (Follow / Undo / Like / Announce)
//! - Signed delivery and outbox fan-out

mod activity;
mod actor;
mod delivery;
mod key_signer;
mod outbox;
mod signature;

pub use activity::{ActivityRouter, ActivityType, InboundActivity, InboundRequest, InboxOutcome};
pub use actor::{ACTIVITY_JSON, Actor, ActorCache, ActorResolver};
pub use delivery::{ActivityDelivery, DeliveryOutcome, DeliveryReport, DeliveryResult, builder};
pub use key_signer::{KeyMaterial, KeySigner, RsaKeySigner, SIGNATURE_ALGORITHM};
pub use outbox::OutboxDispatcher;
pub use signature::{
    HeaderList, POST_SIGNED_HEADERS, ParsedSignature, REQUEST_TARGET, RequestSigner,
    SignatureVerifier, SigningContext, VerificationRequest, authorization_header,
    build_signing_string, generate_digest, host_header_value, http_date, key_id_matches_actor,
    parse_signature_header, path_and_query, signature_value, verify_digest,
};
