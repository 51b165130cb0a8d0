//! Command dispatch over scoped model paths.
//!
//! A scope names a model subtree (`netenv.mynet.dev.us-west-2`,
//! `resource.s3`, `accounts`). The orchestrator validates the scope's
//! shape and existence, initializes every controller so cross-domain
//! references can resolve, then runs the command on the controller that
//! owns the scope with the scope applied as a filter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::controller::{Controller, CtlContext};
use crate::ctl_account::AccountController;
use crate::ctl_codecommit::CodeCommitController;
use crate::ctl_netenv::NetEnvController;
use crate::ctl_s3::S3Controller;
use crate::error::{CtlError, CtlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Validate,
    Provision,
    Delete,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Validate => "validate",
            Command::Provision => "provision",
            Command::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// A validated command scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    parts: Vec<String>,
}

impl Scope {
    /// Parse and shape-check a dotted scope path. Only the shape is
    /// checked here; existence against a loaded model is the
    /// orchestrator's job.
    pub fn parse(raw: &str) -> CtlResult<Self> {
        let invalid = |message: &str| CtlError::InvalidScope {
            scope: raw.to_string(),
            message: message.to_string(),
        };
        let parts: Vec<String> = raw.split('.').map(str::to_string).collect();
        if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path segment"));
        }
        match parts[0].as_str() {
            "accounts" => {
                if parts.len() > 2 {
                    return Err(invalid("accounts scopes are 'accounts' or 'accounts.<name>'"));
                }
            }
            "resource" => {
                if parts.len() < 2 {
                    return Err(invalid("resource scopes name a resource type"));
                }
            }
            "service" => {}
            "netenv" => {
                if parts.len() < 3 {
                    return Err(invalid(
                        "netenv scopes need at least 'netenv.<name>.<environment>'",
                    ));
                }
                if parts.len() > 10 {
                    return Err(invalid("too many path segments"));
                }
                // Fixed structure tokens between the variable segments:
                // netenv.<ne>.<env>.<region>.applications.<app>.groups.<grp>.resources.<res>
                for (index, token) in [(4, "applications"), (6, "groups"), (8, "resources")] {
                    if let Some(part) = parts.get(index) {
                        if part != token {
                            return Err(invalid(&format!(
                                "expected '{}' at segment {}",
                                token,
                                index + 1
                            )));
                        }
                    }
                }
            }
            other => {
                return Err(invalid(&format!("unknown scope type '{}'", other)));
            }
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> Vec<&str> {
        self.parts.iter().map(String::as_str).collect()
    }

    /// The scope as a model path string.
    pub fn path(&self) -> String {
        self.parts.join(".")
    }

    /// The filter applied to the owning controller: the full path, or
    /// nothing when the scope names a whole domain.
    pub fn filter(&self) -> Option<String> {
        if self.parts.len() > 1 {
            Some(self.path())
        } else {
            None
        }
    }
}

pub struct Orchestrator {
    ctx: Arc<CtlContext>,
    controllers: Mutex<BTreeMap<String, Arc<dyn Controller>>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<CtlContext>) -> Self {
        Self {
            ctx,
            controllers: Mutex::new(BTreeMap::new()),
        }
    }

    fn controller(&self, key: &str) -> CtlResult<Arc<dyn Controller>> {
        let mut controllers = self.controllers.lock().expect("controller table lock");
        if let Some(existing) = controllers.get(key) {
            return Ok(existing.clone());
        }
        let controller: Arc<dyn Controller> = match key {
            "accounts" => AccountController::new(self.ctx.clone()),
            "netenv" => NetEnvController::new(self.ctx.clone()),
            "resource.s3" => S3Controller::new(self.ctx.clone()),
            "resource.codecommit" => CodeCommitController::new(self.ctx.clone()),
            other => {
                return Err(CtlError::UnsupportedFeature {
                    path: other.to_string(),
                    feature: "no controller for this scope".to_string(),
                })
            }
        };
        controllers.insert(key.to_string(), controller.clone());
        Ok(controller)
    }

    /// The controller owning a scope.
    fn controller_for(&self, scope: &Scope) -> CtlResult<Arc<dyn Controller>> {
        let parts = scope.parts();
        match parts[0] {
            "accounts" => self.controller("accounts"),
            "netenv" => self.controller("netenv"),
            "resource" => match parts[1] {
                "s3" => self.controller("resource.s3"),
                "codecommit" => self.controller("resource.codecommit"),
                other => Err(CtlError::UnsupportedFeature {
                    path: scope.path(),
                    feature: format!("resource type {}", other),
                }),
            },
            "service" => Err(CtlError::UnsupportedFeature {
                path: scope.path(),
                feature: "service plugins".to_string(),
            }),
            _ => unreachable!("scope shape already validated"),
        }
    }

    /// Initialize every controller with a model presence so resolvers for
    /// all domains are registered before any stack resolves parameters.
    async fn init_all(&self) -> CtlResult<()> {
        self.controller("accounts")?.init().await?;
        if self.ctx.project.resources.contains_key("s3") {
            self.controller("resource.s3")?.init().await?;
        }
        if self.ctx.project.resources.contains_key("codecommit") {
            self.controller("resource.codecommit")?.init().await?;
        }
        if !self.ctx.project.network_environments.is_empty() {
            self.controller("netenv")?.init().await?;
        }
        Ok(())
    }

    /// Run one command against a scope.
    pub async fn run(&self, command: Command, scope_raw: &str) -> CtlResult<()> {
        let scope = Scope::parse(scope_raw)?;
        if scope.parts()[0] == "service" {
            // Service plugins are declared in the model but have no
            // controller here.
            return Err(CtlError::UnsupportedFeature {
                path: scope.path(),
                feature: "service plugins".to_string(),
            });
        }
        if self.ctx.project.node_at(&scope.parts()).is_none() {
            return Err(CtlError::InvalidScope {
                scope: scope_raw.to_string(),
                message: "path does not exist in the project".to_string(),
            });
        }
        info!("{} {}", command, scope.path());
        self.init_all().await?;
        let controller = self.controller_for(&scope)?;
        controller.init().await?;
        controller.set_filter(scope.filter());
        match command {
            Command::Validate => controller.validate().await,
            Command::Provision => controller.provision().await,
            Command::Delete => controller.delete().await,
        }
    }
}
