//! Type helper utilities for syn type analysis.

/// The single generic argument of a path type named `wrapper`.
fn single_arg<'a>(ty: &'a syn::Type, wrapper: &str) -> Option<&'a syn::Type> {
    let syn::Type::Path(type_path) = ty else {
        return None;
    };
    let seg = type_path.path.segments.last()?;
    if seg.ident != wrapper {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &seg.arguments else {
        return None;
    };
    if args.args.len() != 1 {
        return None;
    }
    let syn::GenericArgument::Type(inner) = args.args.first()? else {
        return None;
    };
    Some(inner)
}

/// Extract the inner type T from Option<T>.
pub fn option_inner(ty: &syn::Type) -> Option<&syn::Type> {
    single_arg(ty, "Option")
}

/// Extract the inner type T from Vec<T>.
pub fn vec_inner(ty: &syn::Type) -> Option<&syn::Type> {
    single_arg(ty, "Vec")
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_option_inner() {
        let ty: syn::Type = parse_quote!(Option<String>);
        assert!(option_inner(&ty).is_some());

        let ty: syn::Type = parse_quote!(std::option::Option<i32>);
        assert!(option_inner(&ty).is_some());

        let ty: syn::Type = parse_quote!(Vec<String>);
        assert!(option_inner(&ty).is_none());
    }

    #[test]
    fn test_vec_inner() {
        let ty: syn::Type = parse_quote!(Vec<OrderLine>);
        assert!(vec_inner(&ty).is_some());

        let ty: syn::Type = parse_quote!(Option<Vec<OrderLine>>);
        assert!(vec_inner(&ty).is_none());
    }
}
