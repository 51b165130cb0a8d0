//! CloudFormation template producers.
//!
//! A producer turns one model resource into a template body plus its
//! parameter list. Bodies use long-form intrinsics so they survive YAML
//! canonicalization untouched. Producers are registered per resource type;
//! asking for an unregistered type is an [`CtlError::UnsupportedFeature`].

use std::collections::BTreeMap;
use std::sync::Arc;

use paco_core::{Parameter, StackTemplate};
use paco_model::Resource;

use crate::error::{CtlError, CtlResult};

/// Everything a producer may need about the resource it renders.
pub struct TemplateContext<'a> {
    pub resource_name: &'a str,
    pub resource_path: &'a str,
    pub resource: &'a Resource,
}

pub struct ProducedTemplate {
    pub template: StackTemplate,
    pub parameters: Vec<Parameter>,
}

pub trait TemplateProducer: Send + Sync {
    fn produce(&self, ctx: &TemplateContext<'_>) -> CtlResult<ProducedTemplate>;
}

/// Producers keyed by model resource type.
pub struct TemplateRegistry {
    producers: BTreeMap<String, Arc<dyn TemplateProducer>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            producers: BTreeMap::new(),
        }
    }

    /// Registry with the built-in resource types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("S3Bucket", Arc::new(S3BucketProducer));
        registry.register("SNSTopic", Arc::new(SnsTopicProducer));
        registry
    }

    pub fn register(&mut self, resource_type: &str, producer: Arc<dyn TemplateProducer>) {
        self.producers.insert(resource_type.to_string(), producer);
    }

    pub fn produce(&self, ctx: &TemplateContext<'_>) -> CtlResult<ProducedTemplate> {
        if !ctx.resource.enabled {
            // A disabled resource keeps a deletable placeholder stack
            // instead of being removed, matching CloudFormation's
            // inability to delete the last resource of a stack.
            return Ok(ProducedTemplate {
                template: StackTemplate::new(placeholder_body()),
                parameters: Vec::new(),
            });
        }
        let producer = self.producers.get(&ctx.resource.resource_type).ok_or_else(|| {
            CtlError::UnsupportedFeature {
                path: ctx.resource_path.to_string(),
                feature: format!("resource type {}", ctx.resource.resource_type),
            }
        })?;
        producer.produce(ctx)
    }

    pub fn supports(&self, resource_type: &str) -> bool {
        self.producers.contains_key(resource_type)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Inert body that keeps a stack alive and deletable.
pub fn placeholder_body() -> String {
    "AWSTemplateFormatVersion: '2010-09-09'\n\
     Description: Placeholder for a disabled resource\n\
     Resources:\n\
     \x20 DummyResource:\n\
     \x20   Type: AWS::CloudFormation::WaitConditionHandle\n"
        .to_string()
}

fn config_str<'a>(resource: &'a Resource, key: &str) -> Option<&'a str> {
    resource
        .config
        .get(serde_yaml::Value::String(key.to_string()))
        .and_then(|v| v.as_str())
}

/// `S3Bucket` resources in an application group.
struct S3BucketProducer;

impl TemplateProducer for S3BucketProducer {
    fn produce(&self, ctx: &TemplateContext<'_>) -> CtlResult<ProducedTemplate> {
        let deletion_policy = config_str(ctx.resource, "deletion_policy").unwrap_or("Delete");
        let mut body = String::from(
            "AWSTemplateFormatVersion: '2010-09-09'\nDescription: S3 Bucket\n",
        );
        body.push_str("Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\n");
        body.push_str(&format!("    DeletionPolicy: {}\n", deletion_policy));
        if let Some(bucket_name) = config_str(ctx.resource, "bucket_name") {
            body.push_str("    Properties:\n");
            body.push_str(&format!("      BucketName: {}\n", bucket_name));
        }
        body.push_str(
            "Outputs:\n  Name:\n    Value:\n      Ref: Bucket\n  Arn:\n    Value:\n      Fn::GetAtt:\n        - Bucket\n        - Arn\n",
        );
        Ok(ProducedTemplate {
            template: StackTemplate::new(body),
            parameters: Vec::new(),
        })
    }
}

/// `SNSTopic` resources in an application group.
struct SnsTopicProducer;

impl TemplateProducer for SnsTopicProducer {
    fn produce(&self, ctx: &TemplateContext<'_>) -> CtlResult<ProducedTemplate> {
        let mut body = String::from(
            "AWSTemplateFormatVersion: '2010-09-09'\nDescription: SNS Topic\n",
        );
        body.push_str("Resources:\n  Topic:\n    Type: AWS::SNS::Topic\n");
        if let Some(display_name) = config_str(ctx.resource, "display_name") {
            body.push_str("    Properties:\n");
            body.push_str(&format!("      DisplayName: '{}'\n", display_name));
        }
        body.push_str(
            "Outputs:\n  Arn:\n    Value:\n      Ref: Topic\n  Name:\n    Value:\n      Fn::GetAtt:\n        - Topic\n        - TopicName\n",
        );
        Ok(ProducedTemplate {
            template: StackTemplate::new(body),
            parameters: Vec::new(),
        })
    }
}

/// Template for a globally managed S3 bucket.
pub fn global_bucket_body(bucket_name: &str, deletion_policy: &str) -> String {
    format!(
        "AWSTemplateFormatVersion: '2010-09-09'\n\
         Description: S3 Bucket\n\
         Resources:\n\
         \x20 Bucket:\n\
         \x20   Type: AWS::S3::Bucket\n\
         \x20   DeletionPolicy: {}\n\
         \x20   Properties:\n\
         \x20     BucketName: {}\n\
         Outputs:\n\
         \x20 Name:\n\
         \x20   Value:\n\
         \x20     Ref: Bucket\n\
         \x20 Arn:\n\
         \x20   Value:\n\
         \x20     Fn::GetAtt:\n\
         \x20       - Bucket\n\
         \x20       - Arn\n",
        deletion_policy, bucket_name
    )
}

/// Template for a CodeCommit repository.
pub fn codecommit_repository_body(repository_name: &str, description: Option<&str>) -> String {
    let mut body = String::from(
        "AWSTemplateFormatVersion: '2010-09-09'\nDescription: CodeCommit Repository\n",
    );
    body.push_str("Resources:\n  Repository:\n    Type: AWS::CodeCommit::Repository\n");
    body.push_str("    Properties:\n");
    body.push_str(&format!("      RepositoryName: {}\n", repository_name));
    if let Some(description) = description {
        body.push_str(&format!("      RepositoryDescription: '{}'\n", description));
    }
    body.push_str(
        "Outputs:\n  Name:\n    Value:\n      Fn::GetAtt:\n        - Repository\n        - Name\n  Arn:\n    Value:\n      Fn::GetAtt:\n        - Repository\n        - Arn\n",
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(resource_type: &str, enabled: bool, config: &[(&str, &str)]) -> Resource {
        let mut mapping = serde_yaml::Mapping::new();
        for (k, v) in config {
            mapping.insert(
                serde_yaml::Value::String(k.to_string()),
                serde_yaml::Value::String(v.to_string()),
            );
        }
        Resource {
            resource_type: resource_type.to_string(),
            enabled,
            change_protected: false,
            order: 0,
            title: None,
            config: mapping,
        }
    }

    #[test]
    fn test_s3_bucket_producer() {
        let registry = TemplateRegistry::with_builtins();
        let res = resource("S3Bucket", true, &[("bucket_name", "my-bucket")]);
        let produced = registry
            .produce(&TemplateContext {
                resource_name: "bucket",
                resource_path: "netenv.ne.dev.us-west-2.applications.a.groups.g.resources.bucket",
                resource: &res,
            })
            .unwrap();
        let body = produced.template.body();
        assert!(body.contains("AWS::S3::Bucket"));
        assert!(body.contains("BucketName: my-bucket"));
        // Long-form intrinsics parse as plain YAML.
        assert!(serde_yaml::from_str::<serde_yaml::Value>(body).is_ok());
    }

    #[test]
    fn test_disabled_resource_gets_placeholder() {
        let registry = TemplateRegistry::with_builtins();
        let res = resource("S3Bucket", false, &[]);
        let produced = registry
            .produce(&TemplateContext {
                resource_name: "bucket",
                resource_path: "p",
                resource: &res,
            })
            .unwrap();
        assert!(produced
            .template
            .body()
            .contains("AWS::CloudFormation::WaitConditionHandle"));
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let registry = TemplateRegistry::with_builtins();
        let res = resource("QuantumQueue", true, &[]);
        let err = registry
            .produce(&TemplateContext {
                resource_name: "q",
                resource_path: "netenv.ne.dev.us-west-2.applications.a.groups.g.resources.q",
                resource: &res,
            })
            .err()
            .expect("unregistered resource type must be rejected");
        assert!(matches!(err, CtlError::UnsupportedFeature { .. }));
    }
}
