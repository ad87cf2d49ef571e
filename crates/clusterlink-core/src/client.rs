use std::path::Path;

use anyhow::Result;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

/// A client bound to one context of one kubeconfig file.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    current_context: String,
}

impl KubeClient {
    pub async fn from_config(path: &Path, context: &str) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path)?;
        let opts = KubeConfigOptions { context: Some(context.to_string()), ..Default::default() };
        let config = Config::from_custom_kubeconfig(kubeconfig, &opts).await?;
        let client = Client::try_from(config)?;

        Ok(Self { client, current_context: context.to_string() })
    }

    pub fn context(&self) -> &str {
        &self.current_context
    }

    pub fn inner_client(&self) -> Client {
        self.client.clone()
    }
}
