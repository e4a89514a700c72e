//! One-shot calls to the echo service with JSON arguments.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use wirecall_client::{ClientInvoker, ServiceProxy};
use wirecall_common::WireArgs;

use crate::echo::{METHODS, SERVICE_ID};

/// Calls `method` of the echo service at `address`.
///
/// `args` must be a JSON array matching the method's parameters, for
/// example `["hi"]` for `echo` or `[2, 3]` for `add`.
pub async fn call_echo(
    invoker: &ClientInvoker,
    address: &str,
    method: &str,
    args: Value,
) -> Result<Value> {
    let proxy = invoker.proxy(address, SERVICE_ID)?;
    match method {
        "echo" | "reverse" => invoke::<(String,), String>(&proxy, method, args).await,
        "add" => invoke::<(i64, i64), i64>(&proxy, method, args).await,
        "sleep_ms" => invoke::<(u64,), u64>(&proxy, method, args).await,
        other => bail!(
            "unknown method '{}', expected one of: {}",
            other,
            METHODS.join(", ")
        ),
    }
}

async fn invoke<A, R>(proxy: &ServiceProxy, method: &str, args: Value) -> Result<Value>
where
    A: WireArgs + 'static,
    R: DeserializeOwned + Serialize,
{
    let args: A = serde_json::from_value(args)
        .with_context(|| format!("invalid arguments for '{}'", method))?;
    let result = proxy.method::<A, R>(method)?.call(args).await?;
    Ok(serde_json::to_value(result)?)
}
