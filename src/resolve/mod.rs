//! Evaluates the intrinsic functions of a template against concrete
//! parameter values and the state of already provisioned resources.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::{
    error::ResolveError,
    parameters::ParameterValues,
    template::{pseudo, Template},
};

mod graph;
pub use graph::*;

/// what a provisioned resource exposes to the rest of the template:
/// its physical id (`Ref`) and its attributes (`Fn::GetAtt`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceState {
    pub physical_id: String,
    pub attributes: BTreeMap<String, String>,
}

pub type Provisioned = BTreeMap<String, ResourceState>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoParameters {
    pub account_id: String,
    pub partition: String,
    pub region: String,
    pub stack_name: String,
    pub stack_id: String,
    pub url_suffix: String,
}

impl PseudoParameters {
    pub fn new(account_id: &str, region: &str, stack_name: &str) -> Self {
        let partition = if region.starts_with("cn-") {
            "aws-cn"
        } else if region.starts_with("us-gov-") {
            "aws-us-gov"
        } else {
            "aws"
        };
        let url_suffix = if partition == "aws-cn" { "amazonaws.com.cn" } else { "amazonaws.com" };
        Self {
            account_id: account_id.to_string(),
            partition: partition.to_string(),
            region: region.to_string(),
            stack_name: stack_name.to_string(),
            stack_id: format!(
                "arn:{partition}:cloudformation:{region}:{account_id}:stack/{stack_name}/{}",
                uuid::Uuid::new_v4()
            ),
            url_suffix: url_suffix.to_string(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let v = match name {
            pseudo::ACCOUNT_ID => &self.account_id,
            pseudo::PARTITION => &self.partition,
            pseudo::REGION => &self.region,
            pseudo::STACK_NAME => &self.stack_name,
            pseudo::STACK_ID => &self.stack_id,
            pseudo::URL_SUFFIX => &self.url_suffix,
            _ => return None,
        };
        Some(v.as_str())
    }
}

/// one piece of a Fn::Sub string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubPart {
    Literal(String),
    /// `${Name}` or `${Name.Attribute}`
    Variable(String),
}

pub fn parse_sub(s: &str) -> Result<Vec<SubPart>, ResolveError> {
    let mut out = vec![];
    let mut literal = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| ResolveError::Malformed {
            function: "Fn::Sub".into(),
            reason: format!("unterminated variable in '{s}'"),
        })?;
        let name = &after[..end];
        if let Some(escaped) = name.strip_prefix('!') {
            // ${!Literal} renders as ${Literal}
            literal.push_str("${");
            literal.push_str(escaped);
            literal.push('}');
        } else {
            if !literal.is_empty() {
                out.push(SubPart::Literal(std::mem::take(&mut literal)));
            }
            out.push(SubPart::Variable(name.trim().to_string()));
        }
        rest = &after[end + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        out.push(SubPart::Literal(literal));
    }
    Ok(out)
}

/// names referenced by a value through Ref, Fn::GetAtt or Fn::Sub.
/// Both branches of a Fn::If are included.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_references(value, &mut out);
    out
}

fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(name)) = map.get("Ref") {
                    out.insert(name.clone());
                    return;
                }
                if let Some(att) = map.get("Fn::GetAtt") {
                    let name = match att {
                        Value::Array(parts) => parts.first().and_then(|p| p.as_str()),
                        Value::String(s) => s.split('.').next(),
                        _ => None,
                    };
                    if let Some(name) = name {
                        out.insert(name.to_string());
                    }
                    return;
                }
                if let Some(sub) = map.get("Fn::Sub") {
                    let (template, vars) = match sub {
                        Value::String(s) => (Some(s.as_str()), None),
                        Value::Array(parts) => (parts.first().and_then(|p| p.as_str()), parts.get(1)),
                        _ => (None, None),
                    };
                    let local: BTreeSet<&str> = vars
                        .and_then(|v| v.as_object())
                        .map(|m| m.keys().map(|k| k.as_str()).collect())
                        .unwrap_or_default();
                    if let Some(parts) = template.and_then(|t| parse_sub(t).ok()) {
                        for part in parts {
                            if let SubPart::Variable(var) = part {
                                let name = var.split('.').next().unwrap_or_default();
                                if !local.contains(name) {
                                    out.insert(name.to_string());
                                }
                            }
                        }
                    }
                    if let Some(vars) = vars {
                        collect_references(vars, out);
                    }
                    return;
                }
            }
            map.values().for_each(|v| collect_references(v, out));
        }
        _ => {}
    }
}

fn malformed(function: &str, reason: impl Into<String>) -> ResolveError {
    ResolveError::Malformed {
        function: function.to_string(),
        reason: reason.into(),
    }
}

fn to_text(function: &str, value: &Value) -> Result<String, ResolveError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        x => Err(malformed(function, format!("expected a string, found {x}"))),
    }
}

fn args<'v>(function: &str, value: &'v Value, count: usize) -> Result<&'v [Value], ResolveError> {
    match value {
        Value::Array(items) if items.len() == count => Ok(items),
        _ => Err(malformed(function, format!("expected a list of {count} arguments"))),
    }
}

pub struct Resolver<'a> {
    template: &'a Template,
    parameters: &'a ParameterValues,
    pseudo: &'a PseudoParameters,
    conditions: BTreeMap<String, bool>,
}

impl<'a> Resolver<'a> {
    /// every condition of the template is evaluated up front, since
    /// conditions can only depend on parameters and other conditions.
    pub fn new(
        template: &'a Template,
        parameters: &'a ParameterValues,
        pseudo: &'a PseudoParameters,
    ) -> Result<Self, ResolveError> {
        let mut resolver = Self {
            template,
            parameters,
            pseudo,
            conditions: BTreeMap::new(),
        };
        let mut evaluating = vec![];
        for name in template.conditions.keys() {
            resolver.evaluate_named_condition(name, &mut evaluating)?;
        }
        tracing::debug!(conditions = ?resolver.conditions, "evaluated conditions");
        Ok(resolver)
    }

    pub fn condition(&self, name: &str) -> Result<bool, ResolveError> {
        self.conditions
            .get(name)
            .copied()
            .ok_or_else(|| ResolveError::UnknownCondition(name.to_string()))
    }

    pub fn conditions(&self) -> &BTreeMap<String, bool> {
        &self.conditions
    }

    fn evaluate_named_condition(&mut self, name: &str, evaluating: &mut Vec<String>) -> Result<bool, ResolveError> {
        if let Some(v) = self.conditions.get(name) {
            return Ok(*v);
        }
        if evaluating.iter().any(|n| n == name) {
            let mut cycle = evaluating.clone();
            cycle.push(name.to_string());
            return Err(ResolveError::DependencyCycle(cycle));
        }
        let template = self.template;
        let expr = template
            .conditions
            .get(name)
            .ok_or_else(|| ResolveError::UnknownCondition(name.to_string()))?;
        evaluating.push(name.to_string());
        let value = self.evaluate_condition(expr, evaluating)?;
        evaluating.pop();
        self.conditions.insert(name.to_string(), value);
        Ok(value)
    }

    fn evaluate_condition(&mut self, expr: &Value, evaluating: &mut Vec<String>) -> Result<bool, ResolveError> {
        let (function, arg) = match expr.as_object() {
            Some(map) if map.len() == 1 => map.iter().next().ok_or_else(|| malformed("condition", "empty"))?,
            _ => return Err(malformed("condition", format!("expected a condition function, found {expr}"))),
        };
        match function.as_str() {
            "Condition" => {
                let name = arg.as_str().ok_or_else(|| malformed("Condition", "expected a condition name"))?;
                self.evaluate_named_condition(name, evaluating)
            }
            "Fn::Equals" => {
                let items = args(function, arg, 2)?;
                let none = Provisioned::new();
                let a = self.resolve(&items[0], &none)?;
                let b = self.resolve(&items[1], &none)?;
                Ok(a == b)
            }
            "Fn::Not" => {
                let items = args(function, arg, 1)?;
                Ok(!self.evaluate_condition(&items[0], evaluating)?)
            }
            "Fn::And" | "Fn::Or" => {
                let items = arg.as_array().ok_or_else(|| malformed(function, "expected a list of conditions"))?;
                if items.len() < 2 || items.len() > 10 {
                    return Err(malformed(function, "expected between 2 and 10 conditions"));
                }
                let mut values = vec![];
                for item in items {
                    values.push(self.evaluate_condition(item, evaluating)?);
                }
                Ok(if function == "Fn::And" {
                    values.into_iter().all(|v| v)
                } else {
                    values.into_iter().any(|v| v)
                })
            }
            x => Err(ResolveError::UnsupportedIntrinsic(x.to_string())),
        }
    }

    /// resolves a value to plain JSON. `None` means the value is AWS::NoValue,
    /// the caller removes the property that holds it.
    pub fn resolve(&self, value: &Value, provisioned: &Provisioned) -> Result<Option<Value>, ResolveError> {
        match value {
            Value::Array(items) => {
                let mut out = vec![];
                for item in items {
                    if let Some(v) = self.resolve(item, provisioned)? {
                        out.push(v);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some((key, arg)) = map.iter().next() {
                        if key == "Ref" || key.starts_with("Fn::") {
                            return self.resolve_intrinsic(key, arg, provisioned);
                        }
                    }
                }
                let mut out = Map::new();
                for (key, v) in map {
                    if let Some(v) = self.resolve(v, provisioned)? {
                        out.insert(key.clone(), v);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            x => Ok(Some(x.clone())),
        }
    }

    /// like `resolve`, for places where AWS::NoValue is not allowed
    pub fn resolve_required(&self, value: &Value, provisioned: &Provisioned) -> Result<Value, ResolveError> {
        self.resolve(value, provisioned)?
            .ok_or_else(|| malformed("Ref", format!("{} is not allowed here", pseudo::NO_VALUE)))
    }

    fn resolve_text(&self, function: &str, value: &Value, provisioned: &Provisioned) -> Result<String, ResolveError> {
        to_text(function, &self.resolve_required(value, provisioned)?)
    }

    fn resolve_intrinsic(&self, function: &str, arg: &Value, provisioned: &Provisioned) -> Result<Option<Value>, ResolveError> {
        match function {
            "Ref" => {
                let name = arg.as_str().ok_or_else(|| malformed(function, "expected a name"))?;
                if name == pseudo::NO_VALUE {
                    return Ok(None);
                }
                self.lookup(name, None, provisioned).map(|v| Some(Value::String(v)))
            }
            "Fn::GetAtt" => {
                let (name, attribute) = match arg {
                    Value::Array(parts) if parts.len() == 2 => (
                        to_text(function, &parts[0])?,
                        self.resolve_text(function, &parts[1], provisioned)?,
                    ),
                    Value::String(s) => match s.split_once('.') {
                        Some((n, a)) => (n.to_string(), a.to_string()),
                        None => return Err(malformed(function, format!("expected Name.Attribute, found {s}"))),
                    },
                    _ => return Err(malformed(function, "expected [Name, Attribute]")),
                };
                self.lookup(&name, Some(&attribute), provisioned).map(|v| Some(Value::String(v)))
            }
            "Fn::Sub" => {
                let (template, vars) = match arg {
                    Value::String(s) => (s.as_str(), None),
                    Value::Array(parts) if parts.len() == 2 => (
                        parts[0].as_str().ok_or_else(|| malformed(function, "expected a string"))?,
                        Some(parts[1].as_object().ok_or_else(|| malformed(function, "expected a variable map"))?),
                    ),
                    _ => return Err(malformed(function, "expected a string or [string, variables]")),
                };
                let mut out = String::new();
                for part in parse_sub(template)? {
                    match part {
                        SubPart::Literal(s) => out.push_str(&s),
                        SubPart::Variable(var) => {
                            if let Some(local) = vars.and_then(|v| v.get(&var)) {
                                out.push_str(&self.resolve_text(function, local, provisioned)?);
                                continue;
                            }
                            let resolved = match var.split_once('.') {
                                Some((name, attribute)) if self.template.resources.contains_key(name) => {
                                    self.lookup(name, Some(attribute), provisioned)?
                                }
                                _ => self.lookup(&var, None, provisioned)?,
                            };
                            out.push_str(&resolved);
                        }
                    }
                }
                Ok(Some(Value::String(out)))
            }
            "Fn::Join" => {
                let items = args(function, arg, 2)?;
                let delimiter = to_text(function, &items[0])?;
                let parts = match self.resolve_required(&items[1], provisioned)? {
                    Value::Array(parts) => parts,
                    _ => return Err(malformed(function, "expected a list of values")),
                };
                let parts = parts
                    .iter()
                    .map(|p| to_text(function, p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(Value::String(parts.join(&delimiter))))
            }
            "Fn::If" => {
                let items = args(function, arg, 3)?;
                let name = items[0].as_str().ok_or_else(|| malformed(function, "expected a condition name"))?;
                let branch = if self.condition(name)? { &items[1] } else { &items[2] };
                self.resolve(branch, provisioned)
            }
            "Fn::FindInMap" => {
                let items = args(function, arg, 3)?;
                let map = self.resolve_text(function, &items[0], provisioned)?;
                let top_key = self.resolve_text(function, &items[1], provisioned)?;
                let second_key = self.resolve_text(function, &items[2], provisioned)?;
                let found = self
                    .template
                    .mappings
                    .get(&map)
                    .and_then(|m| m.get(&top_key))
                    .and_then(|m| m.get(&second_key))
                    .cloned();
                found.map(Some).ok_or(ResolveError::MissingMapping { map, top_key, second_key })
            }
            x => Err(ResolveError::UnsupportedIntrinsic(x.to_string())),
        }
    }

    /// value of a parameter, pseudo parameter, resource physical id
    /// or (with an attribute) resource attribute
    fn lookup(&self, name: &str, attribute: Option<&str>, provisioned: &Provisioned) -> Result<String, ResolveError> {
        if attribute.is_none() {
            if let Some(v) = self.pseudo.get(name) {
                return Ok(v.to_string());
            }
            if self.template.parameters.contains_key(name) {
                return self
                    .parameters
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ResolveError::UnknownReference(name.to_string()));
            }
        }
        if !self.template.resources.contains_key(name) {
            return Err(ResolveError::UnknownReference(name.to_string()));
        }
        let state = provisioned
            .get(name)
            .ok_or_else(|| ResolveError::NotProvisioned(name.to_string()))?;
        match attribute {
            None => Ok(state.physical_id.clone()),
            Some(attribute) => state.attributes.get(attribute).cloned().ok_or_else(|| {
                ResolveError::UnknownAttribute {
                    resource: name.to_string(),
                    attribute: attribute.to_string(),
                }
            }),
        }
    }
}
