use super::*;
use serde_json::json;

fn faces(value: serde_json::Value) -> Vec<FaceRecord> {
    parse_faces(value.to_string().as_bytes()).unwrap()
}

fn origin() -> ImageOrigin {
    ImageOrigin::from_topic("T/imageAnalysis/cam1/romo/frame1")
}

#[test]
fn tie_keeps_first_seen_emotion() {
    let faces = faces(json!({
        "FaceDetails": [
            { "Emotions": [{ "Type": "HAPPY", "Confidence": 90.0 }] },
            { "Emotions": [{ "Type": "SAD", "Confidence": 90.0 }] }
        ]
    }));

    let summary = aggregate(&faces, origin()).unwrap();
    assert_eq!(summary.dominant.kind, "HAPPY");
    assert_eq!(summary.dominant.confidence, 90.0);
}

#[test]
fn tie_within_one_face_keeps_earlier_index() {
    let faces = faces(json!({
        "FaceDetails": [
            { "Emotions": [
                { "Type": "CALM", "Confidence": 40.0 },
                { "Type": "SAD", "Confidence": 40.0 }
            ] }
        ]
    }));
    assert_eq!(aggregate(&faces, origin()).unwrap().dominant.kind, "CALM");
}

#[test]
fn quality_maxima_are_independent_of_dominant_face() {
    let faces = faces(json!({
        "FaceDetails": [
            {
                "Emotions": [{ "Type": "HAPPY", "Confidence": 95.0 }],
                "Quality": { "Sharpness": 10.0, "Brightness": 70.0 }
            },
            {
                "Emotions": [{ "Type": "CALM", "Confidence": 20.0 }],
                "Quality": { "Sharpness": 85.0, "Brightness": 30.0 }
            }
        ]
    }));

    let dominant = aggregate(&faces, origin()).unwrap().dominant;
    assert_eq!(dominant.kind, "HAPPY");
    assert_eq!(dominant.max_sharpness, 85.0);
    assert_eq!(dominant.max_brightness, 70.0);
}

#[test]
fn totals_sum_confidence_per_type() {
    let faces = faces(json!({
        "FaceDetails": [
            { "Emotions": [{ "Type": "HAPPY", "Confidence": 60.0 }, { "Type": "SAD", "Confidence": 5.0 }] },
            { "Emotions": [{ "Type": "HAPPY", "Confidence": 30.0 }] }
        ]
    }));

    let totals = aggregate(&faces, origin()).unwrap().totals;
    assert_eq!(totals.get("HAPPY"), Some(&90.0));
    assert_eq!(totals.get("SAD"), Some(&5.0));
}

#[test]
fn empty_face_list_yields_nothing() {
    let faces = faces(json!({ "FaceDetails": [] }));
    assert!(faces.is_empty());
    assert!(aggregate(&faces, origin()).is_none());
}

#[test]
fn payload_without_face_details_is_malformed() {
    let err = parse_faces(br#"{"Labels": []}"#).unwrap_err();
    assert!(matches!(err, crate::utils::error::ProcessingError::MalformedAnalysis));
}

#[test]
fn undecodable_payload_is_decode_error() {
    let err = parse_faces(b"not json").unwrap_err();
    assert!(matches!(err, crate::utils::error::ProcessingError::Decode(_)));
    assert!(matches!(
        parse_faces(b"").unwrap_err(),
        crate::utils::error::ProcessingError::EmptyPayload
    ));
}

#[test]
fn mapping_table() {
    assert_eq!(
        expression_for("SAD"),
        Expression {
            expression: "sad",
            emotion: "sad"
        }
    );
    assert_eq!(expression_for("Happy").expression, "happy");
    assert_eq!(expression_for("calm").emotion, "curious");
    assert_eq!(expression_for("DISGUSTED").expression, "scared");
    assert_eq!(expression_for("anger").expression, "angry");
    assert_eq!(
        expression_for("SURPRISED"),
        Expression {
            expression: "startled",
            emotion: "indifferent"
        }
    );
}

#[test]
fn unknown_emotion_maps_to_default() {
    assert_eq!(expression_for("BORED"), mapping::DEFAULT_EXPRESSION);
    assert_eq!(expression_for("").expression, "none");
    assert_eq!(expression_for("BORED").emotion, "indifferent");
}

#[test]
fn image_origin_from_long_topic() {
    let origin = ImageOrigin::from_topic("T/imageAnalysis/cam1/romo/frame1");
    assert_eq!(origin.source, "romo");
    assert_eq!(origin.image_key, "cam1/romo-frame1");
}

#[test]
fn image_origin_falls_back_on_short_topic() {
    for topic in ["T/x", "T/imageAnalysis/cam1/romo"] {
        let origin = ImageOrigin::from_topic(topic);
        assert_eq!(origin.source, aggregate::DEFAULT_SOURCE);
        assert_eq!(origin.image_key, aggregate::DEFAULT_IMAGE_KEY);
    }
}

#[test]
fn command_wire_format_keeps_legacy_field_names_and_order() {
    let faces = faces(json!({
        "FaceDetails": [{
            "Emotions": [{ "Type": "HAPPY", "Confidence": 90.0 }],
            "Quality": { "Sharpness": 80.5, "Brightness": 60.25 }
        }]
    }));
    let dominant = aggregate(&faces, origin()).unwrap().dominant;
    let command = ExpressionCommand::from_dominant(&dominant);

    let wire = String::from_utf8(command.to_wire().unwrap()).unwrap();
    assert_eq!(
        wire,
        r#"[{"expression":"happy","emotion":"happy","highestEmotion":"happy","higestConfidence":90.0,"source":"romo","Sharpness":80.5,"Brightness":60.25,"image":"cam1/romo-frame1"}]"#
    );
}

#[test]
fn tally_counts_lowercased_and_resets() {
    let mut tally = EmotionTally::new();
    tally.record("HAPPY");
    tally.record("happy");
    tally.record("Sad");

    assert_eq!(tally.count("happy"), 2);
    assert_eq!(tally.count("SAD"), 1);
    assert_eq!(tally.total(), 3);

    tally.reset();
    assert_eq!(tally.total(), 0);
    assert!(tally.counts().is_empty());
}
