use serde_json::{json, Value};

use super::*;

/// HTTP statuses that must only be cached for a very short time, so a
/// transient origin error (ie: a segment not written yet) does not stick.
pub const SHORT_CACHED_ERROR_CODES: [u16; 11] = [400, 403, 404, 405, 414, 416, 500, 501, 502, 503, 504];
pub const ERROR_CACHING_MIN_TTL: u32 = 1;

pub struct CachePolicy {
    pub logical_id: String,
    /// headers that are part of the cache key and forwarded to the origin
    pub forwarded_headers: Vec<String>,
    pub default_ttl: u32,
    pub min_ttl: u32,
    pub max_ttl: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            logical_id: "CachePolicy".into(),
            forwarded_headers: vec![],
            default_ttl: 86400,
            min_ttl: 0,
            max_ttl: 31536000,
        }
    }
}

pub fn add_cache_policy_resource(builder: &mut StackBuilder, conf: &CachePolicy) -> Result<(), TemplateError> {
    let headers_config = if conf.forwarded_headers.is_empty() {
        json!({ "HeaderBehavior": "none" })
    } else {
        json!({ "HeaderBehavior": "whitelist", "Headers": conf.forwarded_headers })
    };
    // cache policy names must be unique per account
    let name = join("-", vec![
        Value::String(conf.logical_id.clone()),
        get_ref(pseudo::STACK_NAME),
        get_ref(pseudo::REGION),
    ]);
    let properties = json!({
        "CachePolicyConfig": {
            "Name": name,
            "DefaultTTL": conf.default_ttl,
            "MinTTL": conf.min_ttl,
            "MaxTTL": conf.max_ttl,
            "ParametersInCacheKeyAndForwardedToOrigin": {
                "CookiesConfig": { "CookieBehavior": "none" },
                "EnableAcceptEncodingGzip": false,
                "HeadersConfig": headers_config,
                "QueryStringsConfig": { "QueryStringBehavior": "none" }
            }
        }
    });
    builder.add_resource(&conf.logical_id, Resource::new("AWS::CloudFront::CachePolicy", properties))
}

pub fn add_origin_access_identity(builder: &mut StackBuilder, logical_id: &str, comment: &str) -> Result<(), TemplateError> {
    let properties = json!({
        "CloudFrontOriginAccessIdentityConfig": { "Comment": comment }
    });
    builder.add_resource(logical_id, Resource::new("AWS::CloudFront::CloudFrontOriginAccessIdentity", properties))
}

pub struct ErrorResponse {
    pub error_code: u16,
    pub error_caching_min_ttl: u32,
}

pub struct S3OriginDistribution {
    pub logical_id: String,
    pub comment: String,
    pub bucket_logical_id: String,
    pub oai_logical_id: String,
    pub cache_policy_logical_id: String,
    pub error_responses: Vec<ErrorResponse>,
}

impl S3OriginDistribution {
    /// every status in SHORT_CACHED_ERROR_CODES is cached for ERROR_CACHING_MIN_TTL seconds
    pub fn short_cached_errors() -> Vec<ErrorResponse> {
        SHORT_CACHED_ERROR_CODES
            .iter()
            .map(|code| ErrorResponse {
                error_code: *code,
                error_caching_min_ttl: ERROR_CACHING_MIN_TTL,
            })
            .collect()
    }
}

pub fn add_cloudfront_resource(builder: &mut StackBuilder, conf: &S3OriginDistribution) -> Result<(), TemplateError> {
    let origin_id = "origin1";
    let oai_path = join("", vec![
        Value::String("origin-access-identity/cloudfront/".into()),
        get_ref(&conf.oai_logical_id),
    ]);
    let error_responses: Vec<Value> = conf
        .error_responses
        .iter()
        .map(|e| json!({ "ErrorCode": e.error_code, "ErrorCachingMinTTL": e.error_caching_min_ttl }))
        .collect();
    let mut config = json!({
        "Enabled": true,
        "HttpVersion": "http2",
        "IPV6Enabled": true,
        "DefaultRootObject": "index.html",
        "Origins": [
            {
                "Id": origin_id,
                "DomainName": get_att(&conf.bucket_logical_id, "RegionalDomainName"),
                "S3OriginConfig": { "OriginAccessIdentity": oai_path }
            }
        ],
        "DefaultCacheBehavior": {
            "TargetOriginId": origin_id,
            "ViewerProtocolPolicy": "redirect-to-https",
            "Compress": true,
            "CachePolicyId": get_ref(&conf.cache_policy_logical_id)
        }
    });
    if !conf.comment.is_empty() {
        config["Comment"] = Value::String(conf.comment.clone());
    }
    if !error_responses.is_empty() {
        config["CustomErrorResponses"] = Value::Array(error_responses);
    }
    let properties = json!({ "DistributionConfig": config });
    builder.add_resource(&conf.logical_id, Resource::new("AWS::CloudFront::Distribution", properties))
}
