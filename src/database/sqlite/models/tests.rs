use super::*;

fn sample_row() -> EmbeddingRow {
    let metadata = ChunkMetadata {
        title: "Ownership".to_string(),
        tags: vec!["rust".to_string()],
        notebook: None,
        heading_path: "Ownership > Moves".to_string(),
        token_count: 12,
    };

    EmbeddingRow {
        id: "rec-1".to_string(),
        note_id: "n1".to_string(),
        chunk_id: "n1#2".to_string(),
        seq: 7,
        chunk_order: 2,
        dimension: 3,
        vector: encode_vector(&[0.25, -0.5, 1.0]),
        text: "Values move by default.".to_string(),
        metadata: serde_json::to_string(&metadata).expect("should serialize metadata"),
        created_at: Utc::now(),
    }
}

#[test]
fn vector_blob_is_little_endian() {
    let bytes = encode_vector(&[1.0]);
    assert_eq!(bytes, 1.0f32.to_le_bytes().to_vec());
    assert_eq!(encode_vector(&[0.5, 2.0]).len(), 8);
}

#[test]
fn decode_restores_values() {
    let vector = vec![0.1, -0.2, 0.3, f32::MIN_POSITIVE];
    let decoded = decode_vector(&encode_vector(&vector)).expect("should decode");
    assert_eq!(decoded, vector);
}

#[test]
fn decode_rejects_truncated_blob() {
    let mut bytes = encode_vector(&[1.0, 2.0]);
    bytes.pop();
    assert!(decode_vector(&bytes).is_err());
}

#[test]
fn decode_rejects_non_finite() {
    let bytes = encode_vector(&[1.0, f32::NAN]);
    assert!(decode_vector(&bytes).is_err());
}

#[test]
fn row_converts_to_record() {
    let record = EmbeddingRecord::try_from(sample_row()).expect("should convert");
    assert_eq!(record.chunk_id, "n1#2");
    assert_eq!(record.order, 2);
    assert_eq!(record.vector, vec![0.25, -0.5, 1.0]);
    assert_eq!(record.metadata.heading_path, "Ownership > Moves");
}

#[test]
fn row_with_wrong_dimension_is_rejected() {
    let row = EmbeddingRow {
        dimension: 4,
        ..sample_row()
    };
    assert!(EmbeddingRecord::try_from(row).is_err());
}

#[test]
fn row_with_bad_metadata_is_rejected() {
    let row = EmbeddingRow {
        metadata: "not json".to_string(),
        ..sample_row()
    };
    assert!(EmbeddingRecord::try_from(row).is_err());
}
