//! Magic strings: statically known strings identified by compact ids.
//!
//! Property names, class tags, `typeof` results, and similar strings the
//! engine needs at runtime are stored once in a static table and carried
//! as 16-bit ids inside string-tagged value words, avoiding a heap
//! allocation per occurrence.

macro_rules! define_magic_strings {
    ($(($variant:ident, $text:literal)),* $(,)?) => {
        /// Identifier of a statically known engine string.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum MagicStringId {
            $(
                #[doc = concat!("The string `\"", $text, "\"`.")]
                $variant,
            )*
        }

        /// All magic string ids in id order.
        const ALL: &[MagicStringId] = &[$(MagicStringId::$variant),*];

        impl MagicStringId {
            /// Returns the text of this magic string.
            pub fn text(self) -> &'static str {
                match self {
                    $(MagicStringId::$variant => $text,)*
                }
            }

            /// Finds the magic id for `text`, if the string is in the
            /// static table.
            pub fn lookup(text: &str) -> Option<MagicStringId> {
                match text {
                    $($text => Some(MagicStringId::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

define_magic_strings! {
    (Empty, ""),
    (Length, "length"),
    (Prototype, "prototype"),
    (Constructor, "constructor"),
    (Caller, "caller"),
    (Arguments, "arguments"),
    (Callee, "callee"),
    (Eval, "eval"),
    (ToString, "toString"),
    (ValueOf, "valueOf"),
    (HasOwnProperty, "hasOwnProperty"),
    (Name, "name"),
    (Message, "message"),
    (Call, "call"),
    (Apply, "apply"),
    (Bind, "bind"),
    (DefineProperty, "defineProperty"),
    (GetOwnPropertyDescriptor, "getOwnPropertyDescriptor"),
    (GetPrototypeOf, "getPrototypeOf"),
    (Keys, "keys"),
    (Value, "value"),
    (Get, "get"),
    (Set, "set"),
    (Writable, "writable"),
    (Enumerable, "enumerable"),
    (Configurable, "configurable"),
    (Print, "print"),
    (ObjectClass, "Object"),
    (FunctionClass, "Function"),
    (ArrayClass, "Array"),
    (StringClass, "String"),
    (BooleanClass, "Boolean"),
    (NumberClass, "Number"),
    (ArgumentsClass, "Arguments"),
    (ErrorClass, "Error"),
    (TypeErrorClass, "TypeError"),
    (RangeErrorClass, "RangeError"),
    (ReferenceErrorClass, "ReferenceError"),
    (SyntaxErrorClass, "SyntaxError"),
    (UriErrorClass, "URIError"),
    (EvalErrorClass, "EvalError"),
    (Undefined, "undefined"),
    (Null, "null"),
    (True, "true"),
    (False, "false"),
    (BooleanType, "boolean"),
    (NumberType, "number"),
    (StringType, "string"),
    (FunctionType, "function"),
    (ObjectType, "object"),
    (NaN, "NaN"),
    (Infinity, "Infinity"),
    (NegativeInfinity, "-Infinity"),
}

impl MagicStringId {
    /// Number of magic strings in the table.
    pub fn count() -> usize {
        ALL.len()
    }

    /// Rebuilds a magic id from its raw 16-bit representation.
    ///
    /// The raw value must come from a previously encoded id.
    pub fn from_raw(raw: u16) -> Self {
        ALL[raw as usize]
    }

    /// Returns the raw 16-bit representation of this id.
    pub fn to_raw(self) -> u16 {
        self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        for &id in ALL {
            assert_eq!(MagicStringId::lookup(id.text()), Some(id));
            assert_eq!(MagicStringId::from_raw(id.to_raw()), id);
        }
    }

    #[test]
    fn test_lookup_unknown() {
        assert_eq!(MagicStringId::lookup("not-a-magic-string"), None);
    }

    #[test]
    fn test_well_known_ids() {
        assert_eq!(MagicStringId::Length.text(), "length");
        assert_eq!(MagicStringId::lookup("prototype"), Some(MagicStringId::Prototype));
        assert_eq!(MagicStringId::Empty.text(), "");
    }
}
