diesel::table! {
    stored_documents (fingerprint) {
        fingerprint -> Text,
        source_id -> Text,
        document_type -> Text,
        court -> Text,
        case_name -> Text,
        payload -> Text,
        completeness -> Double,
        first_seen_at -> Text,
        last_updated_at -> Text,
        update_count -> Integer,
    }
}
