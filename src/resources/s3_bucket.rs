use serde_json::json;

use super::*;

pub struct S3Bucket {
    pub logical_id: String,
    /// id of a request metrics configuration that covers the whole bucket.
    /// none to skip request metrics.
    pub metrics_id: Option<String>,
    pub versioned: bool,
    pub retain: bool,
}

impl Default for S3Bucket {
    fn default() -> Self {
        Self {
            logical_id: "S3Bucket".into(),
            metrics_id: None,
            versioned: true,
            retain: true,
        }
    }
}

/// a private, encrypted bucket. Every public access setting is blocked,
/// so the only way to read it is through a bucket policy.
pub fn add_s3_bucket_resource(builder: &mut StackBuilder, conf: &S3Bucket) -> Result<(), TemplateError> {
    let mut properties = json!({
        "BucketEncryption": {
            "ServerSideEncryptionConfiguration": [
                { "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" } }
            ]
        },
        "PublicAccessBlockConfiguration": {
            "BlockPublicAcls": true,
            "BlockPublicPolicy": true,
            "IgnorePublicAcls": true,
            "RestrictPublicBuckets": true
        }
    });
    if conf.versioned {
        properties["VersioningConfiguration"] = json!({ "Status": "Enabled" });
    }
    if let Some(id) = &conf.metrics_id {
        // no prefix/tag filter: the configuration applies to every object
        properties["MetricsConfigurations"] = json!([{ "Id": id }]);
    }
    let mut bucket = Resource::new("AWS::S3::Bucket", properties);
    if conf.retain {
        bucket = bucket.retain();
    }
    builder.add_resource(&conf.logical_id, bucket)
}

/// allows the origin access identity to read objects, and denies
/// any request to the bucket that is not made over TLS.
pub fn add_origin_read_policy(
    builder: &mut StackBuilder,
    logical_id: &str,
    bucket_logical_id: &str,
    oai_logical_id: &str,
) -> Result<(), TemplateError> {
    let objects = sub(&format!("arn:${{AWS::Partition}}:s3:::${{{bucket_logical_id}}}/*"));
    let bucket_arn = get_att(bucket_logical_id, "Arn");
    let properties = json!({
        "Bucket": get_ref(bucket_logical_id),
        "PolicyDocument": {
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Effect": "Allow",
                    "Action": "s3:GetObject",
                    "Principal": { "CanonicalUser": get_att(oai_logical_id, "S3CanonicalUserId") },
                    "Resource": objects.clone()
                },
                {
                    "Effect": "Deny",
                    "Action": "s3:*",
                    "Principal": { "AWS": "*" },
                    "Resource": [bucket_arn, objects],
                    "Condition": { "Bool": { "aws:SecureTransport": "false" } }
                }
            ]
        }
    });
    builder.add_resource(logical_id, Resource::new("AWS::S3::BucketPolicy", properties))
}
