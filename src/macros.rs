/// Declares a header-name enum whose variants map to fixed wire names.
///
/// Generates `as_str()`, `Display` and `AsRef<str>`, so a variant can be
/// passed anywhere a header key is looked up by string.
///
/// ```ignore
/// define_header_enum! {
///     pub enum CallHeader {
///         Channel => "Channel",
///         Uniqueid => "Uniqueid",
///     }
/// }
/// ```
macro_rules! define_header_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $Name:ident {
            $( $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $( $variant, )+
        }

        impl $Name {
            /// Header name as it appears on the wire.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                (*self).as_str()
            }
        }
    };
}
