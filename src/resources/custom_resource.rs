use serde_json::{Map, Value};

use super::*;
use crate::contract::{props, CUSTOM_RESOURCE_TYPE};

/// a one time provisioning action, dispatched to the function behind `service_token`
/// whenever the stack is created, updated (with changed properties) or deleted.
pub struct CustomAction {
    pub name: String,
    pub service_token: Value,
    pub properties: Vec<(&'static str, Value)>,
    pub depends_on: Vec<String>,
}

impl CustomAction {
    pub fn new(name: &str, service_token: Value) -> Self {
        Self {
            name: name.to_string(),
            service_token,
            properties: vec![],
            depends_on: vec![],
        }
    }

    pub fn prop(mut self, key: &'static str, value: Value) -> Self {
        self.properties.push((key, value));
        self
    }

    pub fn after<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.depends_on.extend(names.iter().map(|n| n.as_ref().to_string()));
        self
    }
}

pub fn add_custom_action(builder: &mut StackBuilder, action: CustomAction) -> Result<(), TemplateError> {
    let mut map = Map::new();
    map.insert(props::SERVICE_TOKEN.to_string(), action.service_token);
    for (key, value) in action.properties {
        map.insert(key.to_string(), value);
    }
    let resource = Resource::new(CUSTOM_RESOURCE_TYPE, Value::Object(map))
        .depends_on(&action.depends_on);
    builder.add_resource(&action.name, resource)
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn service_token_comes_first() {
        let mut builder = StackBuilder::new("");
        let action = CustomAction::new("UUID", get_att("Handler", "Arn"))
            .prop(props::STREAM_NAME, json!("x"))
            .after(&["Bucket"]);
        add_custom_action(&mut builder, action).unwrap();
        let template = builder.build();
        let r = &template.resources["UUID"];
        assert!(r.is_custom());
        let keys: Vec<&String> = r.properties.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["ServiceToken", "StreamName"]);
        assert_eq!(r.depends_on, vec!["Bucket"]);
    }
}
