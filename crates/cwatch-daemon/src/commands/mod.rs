//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod broadcast;
pub mod reports;
pub mod status;

use crate::rpc::RpcError;

/// Map a database error into an RPC error.
pub(crate) fn db_error(e: impl std::fmt::Display) -> RpcError {
    RpcError::internal_error(&format!("db error: {e}"))
}

/// Decode a fixed-size hex parameter.
pub(crate) fn hex_param<const N: usize>(params: &serde_json::Value, name: &str) -> Result<[u8; N], RpcError> {
    let text = params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} required")))?;
    let bytes = hex::decode(text).map_err(|_| RpcError::invalid_params(&format!("{name} must be hex")))?;
    <[u8; N]>::try_from(bytes.as_slice())
        .map_err(|_| RpcError::invalid_params(&format!("{name} must be {N} bytes")))
}

#[cfg(test)]
pub(crate) fn test_state(name: &str) -> std::sync::Arc<crate::DaemonState> {
    use crate::config::DaemonConfig;
    use crate::keys::KeyManager;

    let dir = std::env::temp_dir().join(format!("cwatch-daemon-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("mkdir");

    let mut config = DaemonConfig::default();
    config.proximity.sampling_warmup_secs = 0;
    config.storage.data_dir = dir.to_string_lossy().into_owned();

    let store = cwatch_db::SqliteStore::open_memory().expect("store");
    let keys = KeyManager::load_or_create(&dir, None).expect("keys");
    std::sync::Arc::new(crate::DaemonState::new(config, store, keys, 0).expect("state"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_param() {
        let params = serde_json::json!({"sig": "0a0b", "bad": "zz"});
        assert_eq!(hex_param::<2>(&params, "sig").expect("ok"), [0x0a, 0x0b]);
        assert_eq!(hex_param::<3>(&params, "sig").expect_err("len").code, -32602);
        assert_eq!(hex_param::<2>(&params, "bad").expect_err("hex").code, -32602);
        assert_eq!(hex_param::<2>(&params, "missing").expect_err("missing").code, -32602);
    }
}
