//! SQL text helpers shared by the source and sink

/// Double-quote an identifier, one dotted segment at a time
///
/// `public.user_log` becomes `"public"."user_log"`. Segments that are already
/// quoted are kept as written.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|segment| {
            let segment = segment.trim();
            if segment.len() >= 2 && segment.starts_with('"') && segment.ends_with('"') {
                segment.to_string()
            } else {
                format!("\"{}\"", segment.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
