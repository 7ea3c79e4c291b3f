//! Platform, product and client-type mapping tables.
//!
//! Ids are stable per the provider's documentation. Client-type ids are only
//! meaningful on Linux (platform 6), where server-side components report a
//! sub-type; renderers combine the two as "Linux (Cloud recording)".

/// Platform id to display name. Unknown ids render as the raw number.
pub fn platform_name(platform_id: i64) -> String {
    match platform_id {
        0 => "Other".to_string(),
        1 => "Android".to_string(),
        2 => "iOS".to_string(),
        5 => "Windows".to_string(),
        6 => "Linux".to_string(),
        7 => "Web".to_string(),
        8 => "macOS".to_string(),
        other => other.to_string(),
    }
}

/// Product id to display name.
pub fn product_name(product_id: i64) -> String {
    match product_id {
        1 => "Realtime Communication (RTC)".to_string(),
        3 => "Cloud Recording".to_string(),
        4 => "Media Pull".to_string(),
        5 => "Media Push".to_string(),
        other => other.to_string(),
    }
}

/// Client-type id to display name (Linux only).
pub fn client_type_name(client_type: i64) -> String {
    match client_type {
        3 => "Local server recording".to_string(),
        8 => "Applets".to_string(),
        10 => "Cloud recording".to_string(),
        other => other.to_string(),
    }
}

/// Combined platform display, appending the client type on Linux.
pub fn platform_display(platform_id: Option<i64>, client_type: Option<i64>) -> String {
    let Some(platform_id) = platform_id else {
        return "N/A".to_string();
    };
    let name = platform_name(platform_id);
    match (platform_id, client_type) {
        (6, Some(ct)) => format!("{} ({})", name, client_type_name(ct)),
        _ => name,
    }
}

/// Whether a platform id is one the tables know about.
pub fn is_known_platform(platform_id: i64) -> bool {
    matches!(platform_id, 0 | 1 | 2 | 5 | 6 | 7 | 8)
}

/// Whether a product id is one the tables know about.
pub fn is_known_product(product_id: i64) -> bool {
    matches!(product_id, 1 | 3 | 4 | 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_combines_client_type() {
        assert_eq!(
            platform_display(Some(6), Some(10)),
            "Linux (Cloud recording)"
        );
        assert_eq!(platform_display(Some(6), None), "Linux");
        // Client type is ignored off-Linux.
        assert_eq!(platform_display(Some(7), Some(10)), "Web");
        assert_eq!(platform_display(None, Some(10)), "N/A");
    }

    #[test]
    fn unknown_ids_render_raw() {
        assert_eq!(platform_name(42), "42");
        assert_eq!(product_name(9), "9");
        assert!(!is_known_platform(42));
        assert!(is_known_product(3));
    }
}
