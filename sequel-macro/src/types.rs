use syn::{GenericArgument, PathArguments, Type};

/// Collection types that cannot map onto a single column.
const SEQUENCES: &[&str] = &["Vec", "VecDeque", "LinkedList", "HashSet", "BTreeSet"];

/// Whether `ty` is a collection of values rather than a single column.
///
/// `Vec<u8>` and `[u8; N]` are byte blobs, not sequences.
pub fn is_sequence(ty: &Type) -> bool {
    match ty {
        Type::Array(array) => !is_u8(&array.elem),
        Type::Slice(slice) => !is_u8(&slice.elem),
        Type::Reference(reference) => is_sequence(&reference.elem),
        Type::Path(type_path) => {
            let Some(segment) = type_path.path.segments.last() else {
                return false;
            };
            if !SEQUENCES.contains(&segment.ident.to_string().as_str()) {
                return false;
            }
            match &segment.arguments {
                PathArguments::AngleBracketed(args) => match args.args.first() {
                    Some(GenericArgument::Type(inner)) => !is_u8(inner),
                    _ => true,
                },
                _ => true,
            }
        }
        _ => false,
    }
}

/// Whether `ty` is `u8` or `Option<u8>`. Those bind through `sequel::byte_param`.
pub fn is_byte(ty: &Type) -> bool {
    if is_u8(ty) {
        return true;
    }
    let Type::Path(type_path) = ty else {
        return false;
    };
    let Some(segment) = type_path.path.segments.last() else {
        return false;
    };
    match &segment.arguments {
        PathArguments::AngleBracketed(args) if segment.ident == "Option" => {
            matches!(args.args.first(), Some(GenericArgument::Type(inner)) if is_u8(inner))
        }
        _ => false,
    }
}

fn is_u8(ty: &Type) -> bool {
    matches!(ty, Type::Path(p) if p.path.is_ident("u8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn detects_sequences() {
        assert!(is_sequence(&parse_quote!(Vec<String>)));
        assert!(is_sequence(&parse_quote!(std::collections::HashSet<i64>)));
        assert!(is_sequence(&parse_quote!([i32; 4])));
        assert!(!is_sequence(&parse_quote!(Vec<u8>)));
        assert!(!is_sequence(&parse_quote!([u8; 16])));
        assert!(!is_sequence(&parse_quote!(Option<String>)));
        assert!(!is_sequence(&parse_quote!(String)));
    }

    #[test]
    fn detects_bytes() {
        assert!(is_byte(&parse_quote!(u8)));
        assert!(is_byte(&parse_quote!(Option<u8>)));
        assert!(is_byte(&parse_quote!(std::option::Option<u8>)));
        assert!(!is_byte(&parse_quote!(Vec<u8>)));
        assert!(!is_byte(&parse_quote!(Option<u16>)));
        assert!(!is_byte(&parse_quote!(i8)));
    }
}
