//! Arguments for creating and starting a container in one call.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

/// How a container port should be exposed on the host machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPublishSpec {
    /// Expose inside the network only; no host binding.
    NoPublish,
    /// Let the runtime pick an ephemeral host port.
    Automatic,
    /// Bind to a specific host port.
    Manual(u16),
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Never restart (the default for one-shot helpers).
    #[default]
    No,
    /// Restart when the container exits nonzero.
    OnFailure,
}

/// Everything needed to create and start a container.
///
/// Built via [`CreateAndStartContainerArgsBuilder`]; the two mandatory
/// pieces are the image and the target network, everything else defaults to
/// empty. Maps use deterministic ordering so identical logical requests
/// produce identical runtime calls.
#[derive(Debug, Clone)]
pub struct CreateAndStartContainerArgs {
    pub image: String,
    pub name: String,
    pub network_id: String,
    pub network_alias: Option<String>,
    pub static_ip: Option<Ipv4Addr>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub env_vars: BTreeMap<String, String>,
    /// Host path -> container path.
    pub bind_mounts: BTreeMap<String, String>,
    /// Volume name -> container path.
    pub volume_mounts: BTreeMap<String, String>,
    /// `"<num>/<proto>"` -> publish spec.
    pub used_ports: BTreeMap<String, PortPublishSpec>,
    pub labels: HashMap<String, String>,
    pub capabilities: Vec<String>,
    pub security_opts: Vec<String>,
    pub restart_policy: RestartPolicy,
}

/// Builder for [`CreateAndStartContainerArgs`].
#[derive(Debug, Clone)]
pub struct CreateAndStartContainerArgsBuilder {
    args: CreateAndStartContainerArgs,
}

impl CreateAndStartContainerArgsBuilder {
    /// Starts a builder from the mandatory image, name, and target network.
    #[must_use]
    pub fn new(image: impl Into<String>, name: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            args: CreateAndStartContainerArgs {
                image: image.into(),
                name: name.into(),
                network_id: network_id.into(),
                network_alias: None,
                static_ip: None,
                entrypoint: None,
                cmd: None,
                env_vars: BTreeMap::new(),
                bind_mounts: BTreeMap::new(),
                volume_mounts: BTreeMap::new(),
                used_ports: BTreeMap::new(),
                labels: HashMap::new(),
                capabilities: Vec::new(),
                security_opts: Vec::new(),
                restart_policy: RestartPolicy::No,
            },
        }
    }

    #[must_use]
    pub fn with_network_alias(mut self, alias: impl Into<String>) -> Self {
        self.args.network_alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn with_static_ip(mut self, ip: Ipv4Addr) -> Self {
        self.args.static_ip = Some(ip);
        self
    }

    #[must_use]
    pub fn with_entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.args.entrypoint = Some(entrypoint);
        self
    }

    #[must_use]
    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.args.cmd = Some(cmd);
        self
    }

    #[must_use]
    pub fn with_env_vars(mut self, env_vars: BTreeMap<String, String>) -> Self {
        self.args.env_vars = env_vars;
        self
    }

    #[must_use]
    pub fn with_bind_mounts(mut self, bind_mounts: BTreeMap<String, String>) -> Self {
        self.args.bind_mounts = bind_mounts;
        self
    }

    #[must_use]
    pub fn with_volume_mounts(mut self, volume_mounts: BTreeMap<String, String>) -> Self {
        self.args.volume_mounts = volume_mounts;
        self
    }

    #[must_use]
    pub fn with_used_ports(mut self, used_ports: BTreeMap<String, PortPublishSpec>) -> Self {
        self.args.used_ports = used_ports;
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.args.labels = labels;
        self
    }

    #[must_use]
    pub fn with_added_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.args.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_security_opts(mut self, security_opts: Vec<String>) -> Self {
        self.args.security_opts = security_opts;
        self
    }

    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.args.restart_policy = policy;
        self
    }

    #[must_use]
    pub fn build(self) -> CreateAndStartContainerArgs {
        self.args
    }
}
