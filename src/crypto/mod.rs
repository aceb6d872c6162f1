/// Local cryptographic primitives for the key-management core.
///
/// These are the non-networked fallback operations: callers that hold a key
/// (e.g., a derived DEK) use them directly, without a round-trip to the
/// secret service. There is no automatic degradation from the networked
/// path to these primitives; using them is an explicit choice.
pub mod aead;
pub mod hash;
pub mod keys;
pub mod sensitive;
