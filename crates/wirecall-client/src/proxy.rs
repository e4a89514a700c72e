use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use wirecall_common::protocol::error::Result;
use wirecall_common::protocol::{MethodSignature, SerializationStrategy, WireArgs};
use wirecall_common::transport::Endpoint;

use crate::client::{ClientInvoker, InvocationMode, MethodData};

/// Client-side stand-in for one remote service.
///
/// A proxy binds an invoker, a remote address and a service identifier.
/// Method handles obtained from it compute their signature and strategy once
/// and reuse them for every call.
#[derive(Clone)]
pub struct ServiceProxy {
    invoker: ClientInvoker,
    endpoint: Endpoint,
    service_id: Arc<str>,
}

impl ServiceProxy {
    pub(crate) fn new(invoker: ClientInvoker, endpoint: Endpoint, service_id: String) -> Self {
        Self {
            invoker,
            endpoint,
            service_id: service_id.into(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// A blocking-mode handle for `name` using the default strategy.
    pub fn method<A, R>(&self, name: &str) -> Result<MethodHandle<A, R>>
    where
        A: WireArgs + 'static,
        R: DeserializeOwned,
    {
        self.method_handle(name, None)
    }

    /// A blocking-mode handle for `name` encoded with the named strategy.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStrategy` if no strategy is registered under `strategy`.
    pub fn method_with_strategy<A, R>(&self, name: &str, strategy: &str) -> Result<MethodHandle<A, R>>
    where
        A: WireArgs + 'static,
        R: DeserializeOwned,
    {
        self.method_handle(name, Some(strategy))
    }

    /// An async-mode handle for `name`: calls return at once and deliver
    /// the result to a callback.
    pub fn async_method<A, R>(&self, name: &str) -> Result<AsyncMethodHandle<A, R>>
    where
        A: WireArgs + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        self.async_method_handle(name, None)
    }

    pub fn async_method_with_strategy<A, R>(
        &self,
        name: &str,
        strategy: &str,
    ) -> Result<AsyncMethodHandle<A, R>>
    where
        A: WireArgs + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        self.async_method_handle(name, Some(strategy))
    }

    fn method_handle<A, R>(&self, name: &str, strategy: Option<&str>) -> Result<MethodHandle<A, R>>
    where
        A: WireArgs + 'static,
        R: DeserializeOwned,
    {
        let data = self
            .invoker
            .method_data::<A>(name, strategy, InvocationMode::Blocking)?;
        Ok(MethodHandle {
            proxy: self.clone(),
            data,
            _types: PhantomData,
        })
    }

    fn async_method_handle<A, R>(
        &self,
        name: &str,
        strategy: Option<&str>,
    ) -> Result<AsyncMethodHandle<A, R>>
    where
        A: WireArgs + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let data = self
            .invoker
            .method_data::<A>(name, strategy, InvocationMode::Async)?;
        Ok(AsyncMethodHandle {
            proxy: self.clone(),
            data,
            _types: PhantomData,
        })
    }
}

/// A remote method whose calls are awaited by the caller.
pub struct MethodHandle<A, R> {
    proxy: ServiceProxy,
    data: Arc<MethodData>,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> MethodHandle<A, R>
where
    A: WireArgs,
    R: DeserializeOwned,
{
    /// Sends the request and waits for its result.
    ///
    /// # Errors
    ///
    /// - `Remote` if the service reported a fault
    /// - `Timeout` if no response arrived within the request timeout
    /// - `Connection` / `ConnectionClosed` if the transport carrying the
    ///   request failed
    /// - `ClientStopped` if the invoker was stopped
    pub async fn call(&self, args: A) -> Result<R> {
        let (correlation_id, frame) =
            self.proxy
                .invoker
                .prepare(&self.proxy.service_id, &self.data, &args)?;
        self.proxy
            .invoker
            .dispatch(&self.proxy.endpoint, correlation_id, frame, &self.data)
            .await
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.data.signature
    }

    pub fn strategy(&self) -> SerializationStrategy {
        self.data.strategy
    }
}

impl<A, R> Clone for MethodHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.clone(),
            data: self.data.clone(),
            _types: PhantomData,
        }
    }
}

/// A remote method whose results are delivered to a callback.
pub struct AsyncMethodHandle<A, R> {
    proxy: ServiceProxy,
    data: Arc<MethodData>,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> AsyncMethodHandle<A, R>
where
    A: WireArgs + Send + 'static,
    R: DeserializeOwned + Send + 'static,
{
    /// Issues the call and returns immediately.
    ///
    /// `callback` runs exactly once on a runtime task with the result or the
    /// error, including encoding errors.
    pub fn call<F>(&self, args: A, callback: F)
    where
        F: FnOnce(Result<R>) + Send + 'static,
    {
        let prepared = self
            .proxy
            .invoker
            .prepare(&self.proxy.service_id, &self.data, &args);
        let proxy = self.proxy.clone();
        let data = self.data.clone();
        tokio::spawn(async move {
            let result = match prepared {
                Ok((correlation_id, frame)) => {
                    proxy
                        .invoker
                        .dispatch::<R>(&proxy.endpoint, correlation_id, frame, &data)
                        .await
                }
                Err(e) => Err(e),
            };
            callback(result);
        });
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.data.signature
    }
}

impl<A, R> Clone for AsyncMethodHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.clone(),
            data: self.data.clone(),
            _types: PhantomData,
        }
    }
}
