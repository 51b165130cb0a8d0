//! Controller for network environments.
//!
//! Walks `netenv.<ne>.<env>.<region>` subtrees and composes one nested
//! stack group per application, with groups and resources submitted in
//! their declared order. The controller registers itself for the whole
//! `netenv` subtree so references to resource attributes resolve to
//! deferred stack outputs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use paco_core::{Stack, StackBuilder, StackFlags, StackGroup, StackOrder};
use paco_model::{Application, EnvironmentRegion, NetworkEnvironment, Resource, ResourceGroup};
use paco_refs::{RefError, RefResolver, RefResult, RefValue, Reference};

use crate::controller::{Controller, CtlContext, InitGuard};
use crate::error::{CtlError, CtlResult};
use crate::templates::{TemplateContext, TemplateRegistry};

const DOMAIN: &str = "netenv";

/// Stacks by model path, shared with the resolver.
type StackIndex = Arc<Mutex<BTreeMap<String, Arc<Stack>>>>;

pub struct NetEnvController {
    ctx: Arc<CtlContext>,
    init: InitGuard,
    templates: TemplateRegistry,
    group: Arc<StackGroup>,
    stacks: StackIndex,
}

impl NetEnvController {
    pub fn new(ctx: Arc<CtlContext>) -> Arc<Self> {
        let state_path = ctx.project.paths.build_path.join("netenv-group.yaml");
        Arc::new(Self {
            ctx,
            init: InitGuard::new(),
            templates: TemplateRegistry::with_builtins(),
            group: Arc::new(StackGroup::new("netenv").with_state_path(state_path)),
            stacks: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    fn init_netenv(&self, ne_name: &str, netenv: &NetworkEnvironment) -> CtlResult<()> {
        for (env_name, env) in &netenv.environments {
            for (region_name, region) in &env.regions {
                if !region.enabled {
                    debug!("Environment region {}.{}.{} is disabled", ne_name, env_name, region_name);
                    continue;
                }
                let account_ref = region
                    .account
                    .as_deref()
                    .or(env.account.as_deref())
                    .or(self.ctx.project.manifest.default_account.as_deref())
                    .ok_or_else(|| CtlError::InvalidScope {
                        scope: format!("{}.{}.{}.{}", DOMAIN, ne_name, env_name, region_name),
                        message: "no account configured for environment region".to_string(),
                    })?
                    .to_string();
                let prefix = format!("{}.{}.{}.{}", DOMAIN, ne_name, env_name, region_name);
                self.init_region(&prefix, &account_ref, region_name, region)?;
            }
        }
        Ok(())
    }

    fn init_region(
        &self,
        prefix: &str,
        account_ref: &str,
        region_name: &str,
        region: &EnvironmentRegion,
    ) -> CtlResult<()> {
        let mut apps: Vec<(&String, &Application)> = region
            .applications
            .iter()
            .filter(|(_, app)| app.enabled)
            .collect();
        apps.sort_by_key(|(name, app)| (app.order, name.as_str()));
        for (app_name, app) in apps {
            let app_path = format!("{}.applications.{}", prefix, app_name);
            let app_group = Arc::new(StackGroup::new(app_name.as_str()));
            self.init_application(&app_path, account_ref, region_name, app, &app_group)?;
            self.group
                .add_group(app_group, &[StackOrder::Provision, StackOrder::Wait]);
        }
        Ok(())
    }

    fn init_application(
        &self,
        app_path: &str,
        account_ref: &str,
        region_name: &str,
        app: &Application,
        app_group: &Arc<StackGroup>,
    ) -> CtlResult<()> {
        let mut groups: Vec<(&String, &ResourceGroup)> = app
            .groups
            .iter()
            .filter(|(_, grp)| grp.enabled)
            .collect();
        groups.sort_by_key(|(name, grp)| (grp.order, name.as_str()));
        for (group_name, grp) in groups {
            let mut resources: Vec<(&String, &Resource)> = grp.resources.iter().collect();
            resources.sort_by_key(|(name, res)| (res.order, name.as_str()));
            for (res_name, res) in resources {
                let path = format!(
                    "{}.groups.{}.resources.{}",
                    app_path, group_name, res_name
                );
                self.add_resource(&path, account_ref, region_name, res_name, res, app_group)?;
            }
        }
        Ok(())
    }

    fn add_resource(
        &self,
        path: &str,
        account_ref: &str,
        region_name: &str,
        res_name: &str,
        resource: &Resource,
        app_group: &Arc<StackGroup>,
    ) -> CtlResult<()> {
        let produced = self.templates.produce(&TemplateContext {
            resource_name: res_name,
            resource_path: path,
            resource,
        })?;
        let account = self.ctx.account(account_ref)?;
        let mut builder = StackBuilder::new(
            account,
            region_name.to_string(),
            path.to_string(),
            produced.template,
            self.ctx.clients.clone(),
            self.ctx.store.clone(),
        )
        .flags(StackFlags {
            change_protected: resource.change_protected,
            ..StackFlags::default()
        })
        .poll(self.ctx.poll.clone())
        .retry(self.ctx.retry.clone());
        for parameter in produced.parameters {
            builder = builder.parameter(parameter);
        }
        let stack = builder.build();
        self.stacks
            .lock()
            .expect("stack index lock")
            .insert(path.to_string(), stack.clone());
        app_group.add_stack(stack);
        Ok(())
    }
}

#[async_trait]
impl Controller for NetEnvController {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn init(&self) -> CtlResult<()> {
        if !self.init.begin() {
            return Ok(());
        }
        for (ne_name, netenv) in &self.ctx.project.network_environments {
            self.init_netenv(ne_name, netenv)?;
        }
        self.ctx.resolvers.register(
            DOMAIN,
            Arc::new(NetEnvResolver {
                stacks: self.stacks.clone(),
            }),
        );
        info!(
            "NetEnv controller manages {} stacks",
            self.stacks.lock().expect("stack index lock").len()
        );
        Ok(())
    }

    fn set_filter(&self, filter: Option<String>) {
        self.group.set_filter(filter);
    }

    async fn validate(&self) -> CtlResult<()> {
        Ok(self.group.validate().await?)
    }

    async fn provision(&self) -> CtlResult<()> {
        Ok(self.group.provision().await?)
    }

    async fn delete(&self) -> CtlResult<()> {
        Ok(self.group.delete().await?)
    }
}

/// Answers `netenv...resources.<name>.{arn,name,id}` with deferred stack
/// outputs; a path naming a stack itself resolves to a model node.
struct NetEnvResolver {
    stacks: StackIndex,
}

/// Map a reference attribute to the template's output key.
fn output_key(attribute: &str) -> Option<&'static str> {
    match attribute {
        "arn" => Some("Arn"),
        "name" => Some("Name"),
        "id" => Some("Id"),
        _ => None,
    }
}

#[async_trait]
impl RefResolver for NetEnvResolver {
    async fn resolve_ref(&self, reference: &Reference) -> RefResult<RefValue> {
        let path = reference.ref_path();
        let stacks = self.stacks.lock().expect("stack index lock");
        if stacks.contains_key(path.as_str()) {
            return Ok(RefValue::Node(path));
        }
        let Some((stack_path, attribute)) = path.rsplit_once('.') else {
            return Err(RefError::UnresolvedRef {
                reference: reference.raw().to_string(),
                segment: reference.last_part().to_string(),
            });
        };
        let Some(stack) = stacks.get(stack_path) else {
            return Err(RefError::UnresolvedRef {
                reference: reference.raw().to_string(),
                segment: reference.last_part().to_string(),
            });
        };
        match output_key(attribute) {
            Some(key) => Ok(RefValue::Output(
                stack.clone() as Arc<dyn paco_refs::OutputSource>,
                key.to_string(),
            )),
            None => Err(RefError::RefTypeMismatch {
                reference: reference.raw().to_string(),
                attribute: attribute.to_string(),
            }),
        }
    }
}
