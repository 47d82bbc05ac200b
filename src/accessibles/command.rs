//! `Command`, grounded in `frappy/params.py`'s `Command` descriptor and
//! `secop/protocol/dispatcher.py`'s `_execute_command`.

use serde_json::{Map, Value as Json};

use super::Accessible;
use crate::errors::Result;
use crate::types::{CommandInfo, DataType, Value};

#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub description: String,
    pub argument: Option<DataType>,
    pub result: Option<DataType>,
    pub group: Option<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Command { name: name.into(), description: description.into(), argument: None, result: None, group: None }
    }

    pub fn with_argument(mut self, datatype: DataType) -> Self {
        self.argument = Some(datatype);
        self
    }

    pub fn with_result(mut self, datatype: DataType) -> Self {
        self.result = Some(datatype);
        self
    }

    /// Validate the JSON argument sent by `do` (spec §6); `None` is only
    /// accepted for commands declared with no argument type.
    pub fn validate_argument(&self, raw: Option<&Json>) -> Result<Option<Value>> {
        match (&self.argument, raw) {
            (None, None) => Ok(None),
            (None, Some(Json::Null)) => Ok(None),
            (None, Some(_)) => Err(crate::errors::SecopError::WrongType(format!(
                "{} takes no argument",
                self.name
            ))),
            (Some(dt), Some(v)) => Ok(Some(dt.validate(v)?)),
            (Some(dt), None) => Ok(Some(dt.validate(&Json::Null)?)),
        }
    }

    fn datatype(&self) -> DataType {
        DataType::Command(CommandInfo {
            argument: self.argument.clone().map(Box::new),
            result: self.result.clone().map(Box::new),
        })
    }
}

impl Accessible for Command {
    fn name(&self) -> &str {
        &self.name
    }

    fn export_datatype(&self) -> Json {
        self.datatype().export_datatype()
    }

    fn export_properties(&self) -> Map<String, Json> {
        let mut props = Map::new();
        props.insert("description".to_string(), Json::from(self.description.clone()));
        props.insert("datainfo".to_string(), self.export_datatype());
        if let Some(group) = &self.group {
            props.insert("group".to_string(), Json::from(group.clone()));
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_argument_command_rejects_extra_value() {
        let cmd = Command::new("stop", "halt motion");
        assert!(cmd.validate_argument(None).unwrap().is_none());
        assert!(cmd.validate_argument(Some(&Json::from(1))).is_err());
    }

    #[test]
    fn argument_command_validates_via_datatype() {
        let cmd = Command::new("go", "move to").with_argument(DataType::float(0.0, 10.0));
        let v = cmd.validate_argument(Some(&Json::from(5.0))).unwrap();
        assert_eq!(v, Some(Value::Float(5.0)));
        assert!(cmd.validate_argument(Some(&Json::from(50.0))).is_err());
    }
}
