use std::rc::Rc;

use trellis_core::Value;

use super::{
    Bindable, Binding, BindingMode, CallBinding, InterpolationBinding, LetBinding, MultiInterpolationBinding,
    RefBinding,
};
use crate::error::{Error, Result};
use crate::parser::BindingType;
use crate::resources::{ServiceLocator, ServiceLocatorExt};

/// The binding command of an instruction, as written after the attribute
/// name (`value.two-way`, `click.call`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingCommand {
    /// `.one-time`
    OneTime,
    /// `.to-view` / `.bind` on most properties
    ToView,
    /// `.from-view`
    FromView,
    /// `.two-way`
    TwoWay,
    /// `.call`
    Call,
    /// `ref`
    Ref,
    /// Attribute text containing `${...}`.
    Interpolation,
    /// A `<let>` declaration.
    Let {
        /// Write to the binding context instead of the scope locals.
        to_view_model: bool,
    },
}

impl BindingCommand {
    fn binding_type(self) -> BindingType {
        match self {
            Self::Ref => BindingType::Ref,
            Self::Interpolation => BindingType::Interpolation,
            _ => BindingType::Expression,
        }
    }

    fn mode(self) -> BindingMode {
        match self {
            Self::OneTime => BindingMode::ONE_TIME,
            Self::FromView => BindingMode::FROM_VIEW,
            Self::TwoWay => BindingMode::TWO_WAY,
            _ => BindingMode::TO_VIEW,
        }
    }
}

/// A compiled description of one binding: which property of the target, the
/// source text, and the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInstruction {
    /// The target property, or the declared name for `Let`.
    pub target_property: String,
    /// The source text.
    pub source: String,
    /// How the source is bound.
    pub command: BindingCommand,
}

impl BindingInstruction {
    /// An instruction for `command`.
    pub fn new(command: BindingCommand, target_property: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target_property: target_property.into(),
            source: source.into(),
            command,
        }
    }

    /// Parse the source and create an unbound binding for `target`.
    ///
    /// `Let` instructions ignore `target`; they write to the scope they are
    /// bound to.
    pub fn hydrate(&self, target: &Value, locator: Rc<dyn ServiceLocator>) -> Result<Rc<dyn Bindable>> {
        let parser = locator.expression_parser()?;
        let property = self.target_property.as_str();
        let binding: Rc<dyn Bindable> = match self.command {
            BindingCommand::Interpolation => {
                let Some(interpolation) = parser.parse_interpolation(&self.source)? else {
                    return Err(Error::InvalidInstruction(format!(
                        "'{}' on '{property}' contains no expressions",
                        self.source
                    )));
                };
                match interpolation.interpolation_expressions() {
                    [single] => InterpolationBinding::new(
                        single.clone(),
                        interpolation.clone(),
                        target.clone(),
                        property,
                        BindingMode::TO_VIEW,
                        locator,
                        true,
                    )?,
                    _ => MultiInterpolationBinding::new(
                        interpolation.clone(),
                        target.clone(),
                        property,
                        BindingMode::TO_VIEW,
                        locator,
                    )?,
                }
            }
            command => {
                let source = parser.parse(&self.source, command.binding_type())?;
                match command {
                    BindingCommand::Call => CallBinding::new(source, target.clone(), property, locator)?,
                    BindingCommand::Ref => RefBinding::new(source, target.clone(), locator)?,
                    BindingCommand::Let { to_view_model } => LetBinding::new(source, property, to_view_model, locator)?,
                    _ => Binding::new(source, target.clone(), property, command.mode(), locator)?,
                }
            }
        };
        tracing::trace!(
            target: "trellis::binding",
            property,
            source = %self.source,
            command = ?self.command,
            "hydrated binding instruction"
        );
        Ok(binding)
    }
}

#[cfg(test)]
mod tests {
    use trellis_core::{LifecycleFlags, ObjectRef};

    use super::*;
    use crate::resources::ResourceRegistry;
    use crate::scope::Scope;

    #[test]
    fn test_hydrate_property_binding() {
        let registry = ResourceRegistry::standalone();
        let input = ObjectRef::new();
        let vm = ObjectRef::from_pairs([("name", "Ada")]);
        let binding = BindingInstruction::new(BindingCommand::TwoWay, "value", "name")
            .hydrate(&Value::Object(input.clone()), registry.clone())
            .unwrap();
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        assert_eq!(input.get("value"), Value::from("Ada"));

        input.set("value", "Grace");
        assert_eq!(vm.get("name"), Value::from("Grace"));
        assert!(binding.is_bound());
    }

    #[test]
    fn test_hydrate_single_interpolation() {
        let registry = ResourceRegistry::standalone();
        let label = ObjectRef::new();
        let vm = ObjectRef::from_pairs([("count", 3)]);
        let binding = BindingInstruction::new(BindingCommand::Interpolation, "text", "${count} items")
            .hydrate(&Value::Object(label.clone()), registry)
            .unwrap();
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm).unwrap()).unwrap();
        assert_eq!(label.get("text"), Value::from("3 items"));
    }

    #[test]
    fn test_hydrate_rejects_plain_interpolation() {
        let registry = ResourceRegistry::standalone();
        let result = BindingInstruction::new(BindingCommand::Interpolation, "text", "no expressions")
            .hydrate(&Value::Object(ObjectRef::new()), registry);
        assert!(matches!(result, Err(Error::InvalidInstruction(_))));
    }

    #[test]
    fn test_hydrate_reports_parse_errors() {
        let registry = ResourceRegistry::standalone();
        let result =
            BindingInstruction::new(BindingCommand::ToView, "value", "a +").hydrate(&Value::Undefined, registry);
        assert!(matches!(result, Err(Error::Parse { .. })));
    }
}
