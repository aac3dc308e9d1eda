use std::collections::BTreeMap;

use serde_json::Value;

use crate::resolve::{PseudoParameters, ResourceState};

fn random_suffix(len: usize) -> String {
    let s = uuid::Uuid::new_v4().simple().to_string();
    s[..len.min(s.len())].to_string()
}

/// names generated for resources without an explicit name follow the
/// `{stack}-{logical id}-{random}` pattern CloudFormation uses
fn generated_name(pseudo: &PseudoParameters, logical_id: &str, lowercase: bool) -> String {
    let name = format!("{}-{}-{}", pseudo.stack_name, logical_id, random_suffix(12).to_uppercase());
    if lowercase {
        name.to_lowercase()
    } else {
        name
    }
}

fn distribution_style_id() -> String {
    format!("E{}", random_suffix(13).to_uppercase())
}

/// the physical id and attributes a native resource would have once created.
/// Only the resource types the live streaming stack uses get attributes,
/// anything else gets a generated physical id.
pub fn synthesize(ty: &str, logical_id: &str, properties: &Value, pseudo: &PseudoParameters) -> ResourceState {
    let mut attributes = BTreeMap::new();
    let partition = &pseudo.partition;
    let physical_id = match ty {
        "AWS::S3::Bucket" => {
            let name = properties
                .get("BucketName")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| generated_name(pseudo, logical_id, true));
            attributes.insert("Arn".into(), format!("arn:{partition}:s3:::{name}"));
            attributes.insert("DomainName".into(), format!("{name}.s3.{}", pseudo.url_suffix));
            attributes.insert(
                "RegionalDomainName".into(),
                format!("{name}.s3.{}.{}", pseudo.region, pseudo.url_suffix),
            );
            name
        }
        "AWS::CloudFront::CloudFrontOriginAccessIdentity" => {
            let id = distribution_style_id();
            attributes.insert("Id".into(), id.clone());
            attributes.insert(
                "S3CanonicalUserId".into(),
                format!("{}{}", random_suffix(32), random_suffix(32)),
            );
            id
        }
        "AWS::CloudFront::CachePolicy" => {
            let id = uuid::Uuid::new_v4().to_string();
            attributes.insert("Id".into(), id.clone());
            id
        }
        "AWS::CloudFront::Distribution" => {
            let id = distribution_style_id();
            attributes.insert("Id".into(), id.clone());
            attributes.insert("DomainName".into(), format!("d{}.cloudfront.net", random_suffix(13)));
            id
        }
        "AWS::IAM::Role" => {
            let name = generated_name(pseudo, logical_id, false);
            attributes.insert("Arn".into(), format!("arn:{partition}:iam::{}:role/{name}", pseudo.account_id));
            attributes.insert("RoleId".into(), format!("AROA{}", random_suffix(17).to_uppercase()));
            name
        }
        "AWS::Lambda::Function" => {
            let name = generated_name(pseudo, logical_id, false);
            attributes.insert(
                "Arn".into(),
                format!("arn:{partition}:lambda:{}:{}:function:{name}", pseudo.region, pseudo.account_id),
            );
            name
        }
        _ => generated_name(pseudo, logical_id, false),
    };
    tracing::debug!(logical_id, ty, %physical_id, "synthesized resource");
    ResourceState {
        physical_id,
        attributes,
    }
}
