//! Password derivation for node-side authorizations.
//!
//! All passwords pushed to node agents are pure functions of stable inputs
//! (subscription UUID or node token hash), so the control plane never stores
//! them and any instance derives identical values. The node agent runs the
//! same construction; changing it is a breaking protocol change.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::node::{Node, Protocol};

type HmacSha256 = Hmac<Sha256>;

/// Derived passwords are the first 16 bytes of the MAC, hex-encoded.
const PASSWORD_BYTES: usize = 16;

fn mac_hex(key: &[u8], parts: &[&[u8]]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    let digest = mac.finalize().into_bytes();
    hex::encode(&digest[..PASSWORD_BYTES])
}

/// Password for an end-user authorization on a node with the given
/// encryption method. Keyed by the control plane's HMAC secret.
pub fn derive_user_password(uuid: &Uuid, secret: &str, method: &str) -> String {
    mac_hex(
        secret.as_bytes(),
        &[uuid.to_string().as_bytes(), b":", method.as_bytes()],
    )
}

/// Password for the synthetic node-forwarding authorization that lets peer
/// nodes relay through this one. Keyed by the node's own token hash.
pub fn derive_node_forward_password(token_hash: &str, method: &str) -> String {
    mac_hex(
        token_hash.as_bytes(),
        &[b"node-forward:", method.as_bytes()],
    )
}

/// Server-forwarding key for a peer node, selected by protocol: the cipher
/// method feeds the derivation for Shadowsocks, Trojan and AnyTLS use the
/// bare token hash, and non-forwarding protocols get an empty key.
pub fn forwarding_password(node: &Node) -> String {
    match node.protocol {
        Protocol::Shadowsocks => derive_node_forward_password(
            &node.token_hash,
            node.encryption_method.as_deref().unwrap_or(""),
        ),
        Protocol::Trojan | Protocol::AnyTls => {
            derive_node_forward_password(&node.token_hash, "")
        }
        _ => String::new(),
    }
}

/// Hash of a node agent's access token, as stored on the node record.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
