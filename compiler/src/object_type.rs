// object_type.rs — Closed set of declaration object types
//
// Declarations carry an object-type tag (`signal`, `module`,
// `_domainDefinition`, ...). The core engine only dispatches on the types it
// knows; anything else (framework-defined types) is kept verbatim in
// `ObjectType::Extension` so it survives resolution untouched.

use std::fmt;

/// Declaration object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Signal,
    Constant,
    Buffer,
    Switch,
    Trigger,
    Module,
    PlatformModule,
    DomainDefinition,
    FrameworkDescription,
    Type,
    TypeProperty,
    MainInputPort,
    MainOutputPort,
    PropertyInputPort,
    PropertyOutputPort,
    /// Object type not known to the core (framework extension).
    Extension(String),
}

/// Coarse grouping used by dispatch code that does not care about the exact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectCategory {
    SignalLike,
    ModuleLike,
    DomainLike,
    PortLike,
    TypeLike,
    Other,
}

impl ObjectType {
    pub fn parse(text: &str) -> Self {
        match text {
            "signal" => ObjectType::Signal,
            "constant" => ObjectType::Constant,
            "buffer" => ObjectType::Buffer,
            "switch" => ObjectType::Switch,
            "trigger" => ObjectType::Trigger,
            "module" => ObjectType::Module,
            "platformModule" => ObjectType::PlatformModule,
            "_domainDefinition" => ObjectType::DomainDefinition,
            "_frameworkDescription" => ObjectType::FrameworkDescription,
            "type" => ObjectType::Type,
            "typeProperty" => ObjectType::TypeProperty,
            "mainInputPort" => ObjectType::MainInputPort,
            "mainOutputPort" => ObjectType::MainOutputPort,
            "propertyInputPort" => ObjectType::PropertyInputPort,
            "propertyOutputPort" => ObjectType::PropertyOutputPort,
            other => ObjectType::Extension(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ObjectType::Signal => "signal",
            ObjectType::Constant => "constant",
            ObjectType::Buffer => "buffer",
            ObjectType::Switch => "switch",
            ObjectType::Trigger => "trigger",
            ObjectType::Module => "module",
            ObjectType::PlatformModule => "platformModule",
            ObjectType::DomainDefinition => "_domainDefinition",
            ObjectType::FrameworkDescription => "_frameworkDescription",
            ObjectType::Type => "type",
            ObjectType::TypeProperty => "typeProperty",
            ObjectType::MainInputPort => "mainInputPort",
            ObjectType::MainOutputPort => "mainOutputPort",
            ObjectType::PropertyInputPort => "propertyInputPort",
            ObjectType::PropertyOutputPort => "propertyOutputPort",
            ObjectType::Extension(name) => name,
        }
    }

    pub fn category(&self) -> ObjectCategory {
        match self {
            ObjectType::Signal
            | ObjectType::Constant
            | ObjectType::Buffer
            | ObjectType::Switch
            | ObjectType::Trigger => ObjectCategory::SignalLike,
            ObjectType::Module | ObjectType::PlatformModule => ObjectCategory::ModuleLike,
            ObjectType::DomainDefinition => ObjectCategory::DomainLike,
            ObjectType::MainInputPort
            | ObjectType::MainOutputPort
            | ObjectType::PropertyInputPort
            | ObjectType::PropertyOutputPort => ObjectCategory::PortLike,
            ObjectType::Type | ObjectType::TypeProperty => ObjectCategory::TypeLike,
            ObjectType::FrameworkDescription | ObjectType::Extension(_) => ObjectCategory::Other,
        }
    }

    pub fn is_module_like(&self) -> bool {
        self.category() == ObjectCategory::ModuleLike
    }

    pub fn is_port(&self) -> bool {
        self.category() == ObjectCategory::PortLike
    }

    pub fn is_extension(&self) -> bool {
        matches!(self, ObjectType::Extension(_))
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_roundtrip_through_text() {
        for text in [
            "signal",
            "constant",
            "module",
            "platformModule",
            "_domainDefinition",
            "mainOutputPort",
            "typeProperty",
        ] {
            assert_eq!(ObjectType::parse(text).as_str(), text);
        }
    }

    #[test]
    fn unknown_type_is_extension() {
        let ty = ObjectType::parse("oscSender");
        assert_eq!(ty, ObjectType::Extension("oscSender".to_string()));
        assert!(ty.is_extension());
        assert_eq!(ty.category(), ObjectCategory::Other);
    }

    #[test]
    fn categories() {
        assert!(ObjectType::PlatformModule.is_module_like());
        assert!(ObjectType::PropertyInputPort.is_port());
        assert_eq!(
            ObjectType::DomainDefinition.category(),
            ObjectCategory::DomainLike
        );
    }
}
