use criterion::{black_box, criterion_group, criterion_main, Criterion};
use clinical_extractor::{extract_json, FieldSchema, PlaceholderCheck, PromptTemplate, SchemaValidator};

const CHATTY_REPLY: &str = "Sure! Based on the pathology report, here is the staging:\n\n\
{\n  \"Tstage\": \"T2\",\n  \"reason\": \"Invasive carcinoma measuring 2.4 cm {largest focus}\"\n}\n\n\
Let me know if you need anything else.";

fn bench_extraction(c: &mut Criterion) {
    c.bench_function("extract_json_chatty_reply", |b| {
        b.iter(|| black_box(extract_json(black_box(CHATTY_REPLY))))
    });

    let long_reply = format!("{}{}", "lorem ipsum ".repeat(2_000), CHATTY_REPLY);
    c.bench_function("extract_json_long_reply", |b| {
        b.iter(|| black_box(extract_json(black_box(&long_reply))))
    });
}

fn bench_validation(c: &mut Criterion) {
    let schema = FieldSchema::new(["Tstage", "reason"]);
    let lenient = SchemaValidator::new(schema.clone(), PlaceholderCheck::Lenient);
    let strict = SchemaValidator::new(schema, PlaceholderCheck::Strict);

    c.bench_function("validate_reply_lenient", |b| {
        b.iter(|| black_box(lenient.validate_reply(black_box(CHATTY_REPLY))))
    });

    c.bench_function("validate_reply_strict_placeholders", |b| {
        b.iter(|| black_box(strict.validate_reply(black_box("{\"Tstage\": \"invalid\", \"reason\": \" INVALID \"}"))))
    });

    c.bench_function("validate_reply_missing_field", |b| {
        b.iter(|| black_box(strict.validate_reply(black_box("{\"Tstage\": \"T1\"}"))))
    });
}

fn bench_prompt_rendering(c: &mut Criterion) {
    let template = PromptTemplate::new(format!(
        "{}\nReport:\n{{Results}}\nAnswer as {{\"Tstage\": \"...\", \"reason\": \"...\"}}",
        "Stage the primary tumor using AJCC 8th edition criteria. ".repeat(50)
    ));
    let report = "Invasive ductal carcinoma, 2.4 cm, margins negative. ".repeat(40);

    c.bench_function("prompt_render", |b| {
        b.iter(|| black_box(template.render(black_box(&report))))
    });
}

criterion_group!(benches, bench_extraction, bench_validation, bench_prompt_rendering);
criterion_main!(benches);
