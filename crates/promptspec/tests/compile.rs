//! End-to-end compilation with the offline oracle.

use std::sync::Arc;

use promptspec::prelude::*;

fn compiler(reader: MemoryReader) -> Compiler {
    Compiler::new(EchoOracle::new(), reader)
}

async fn compile(source: &str, bindings: &Bindings) -> CompileOutput {
    compiler(MemoryReader::new()).compile(source, bindings).await
}

// ── Control flow ───────────────────────────────────────────────────

#[tokio::test]
async fn unbound_flag_selects_else() {
    let output = compile("@if flag\n  A\n@else\n  B", &Bindings::new()).await;
    assert_eq!(output.composed_prompt, "B");
    assert_eq!(output.warnings().len(), 1);
    assert!(output.warnings()[0].contains("flag"));
    assert!(!output.has_errors());
}

#[tokio::test]
async fn bound_flag_selects_then() {
    let bindings = Bindings::new().with("flag", true);
    let output = compile("@if flag\n  A\n@else\n  B", &bindings).await;
    assert_eq!(output.composed_prompt, "A");
    assert!(output.warnings().is_empty());
}

#[tokio::test]
async fn match_without_fallback_drops_construct() {
    let source = "Before.\n@match x\n  \"a\" ==> A\n  \"b\" ==> B\nAfter.";
    let output = compile(source, &Bindings::new().with("x", "c")).await;
    assert_eq!(output.composed_prompt, "Before.\nAfter.");
    assert_eq!(output.warnings().len(), 1);
}

#[tokio::test]
async fn match_block_case_with_nested_directive() {
    let source = "\
@match level
  \"beginner\" ==>
    Explain simply.
    @if examples
      Give one example.
  _ ==> Be concise.";
    let bindings = Bindings::new()
        .with("level", "beginner")
        .with("examples", true);
    let output = compile(source, &bindings).await;
    assert_eq!(output.composed_prompt, "Explain simply.\nGive one example.");

    let output = compile(source, &Bindings::new().with("level", "expert")).await;
    assert_eq!(output.composed_prompt, "Be concise.");
}

// ── Variables and escapes ──────────────────────────────────────────

#[tokio::test]
async fn variables_substitute_in_every_form() {
    let bindings = Bindings::new()
        .with("topic", "volcanoes")
        .with("items", serde_json::json!(["ash", "lava"]));
    let output = compile(
        "Topic: {{topic}} (@topic, @{topic}).\n{{#items}}- {{.}}\n{{/items}}",
        &bindings,
    )
    .await;
    assert_eq!(
        output.composed_prompt,
        "Topic: volcanoes (volcanoes, volcanoes).\n- ash\n- lava"
    );
}

#[tokio::test]
async fn escaped_directive_stays_literal() {
    let output = compile(
        "Use @@if in docs.\n@@note not a comment\nMail a@@b.io",
        &Bindings::new(),
    )
    .await;
    assert_eq!(
        output.composed_prompt,
        "Use @if in docs.\n@note not a comment\nMail a@b.io"
    );
    assert!(output.diagnostics.warnings.is_empty());
    assert!(!output.composed_prompt.contains("@@"));
}

#[tokio::test]
async fn recompiling_output_is_stable() {
    let source = "# Tutor\n@if short\n  Be brief.\n@note internal\nExplain {{topic}}.";
    let bindings = Bindings::new().with("short", true).with("topic", "tides");
    let first = compile(source, &bindings).await;
    let second = compile(&first.composed_prompt, &bindings).await;
    assert_eq!(first.composed_prompt, second.composed_prompt);
    assert_eq!(second.transitions.len(), 1);
}

#[tokio::test]
async fn multiline_value_stays_inside_directive_body() {
    let oracle = Arc::new(EchoOracle::new());
    let compiler = Compiler::new(oracle.clone(), MemoryReader::new());
    let bindings = Bindings::new().with("doc", "Para one.\nPara two.");
    let output = compiler
        .compile("@summarize\n  {{doc}}\nDone.", &bindings)
        .await;

    let requests = oracle.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].operation, Operation::Summarize);
    assert_eq!(requests[0].target_text, "Para one.\nPara two.");
    assert_eq!(output.composed_prompt, "Para one.\nPara two.\nDone.");
    assert!(output.warnings().is_empty(), "{:?}", output.warnings());
}

// ── Ordering ───────────────────────────────────────────────────────

#[tokio::test]
async fn inner_directive_resolves_before_outer() {
    let oracle = Arc::new(EchoOracle::new());
    let compiler = Compiler::new(oracle.clone(), MemoryReader::new());
    let bindings = Bindings::new().with("name", "Ada");
    compiler
        .compile(
            "@compress\n  Hello {{name}}.\n  @if formal\n    Dear sir.\n  @expand mention the weather",
            &bindings,
        )
        .await;

    let requests = oracle.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].operation, Operation::Expand);
    assert_eq!(requests[0].target_text, "Hello Ada.");
    assert_eq!(requests[1].operation, Operation::Compress);
    assert_eq!(requests[1].target_text, "Hello Ada.\nmention the weather");
}

#[tokio::test]
async fn one_transition_entry_per_pass() {
    let output = compile("A.\n@note x\n@audience kids", &Bindings::new()).await;
    assert_eq!(output.transitions.len(), 2);
    assert!(output.transitions[0].starts_with("pass 1:"));
    assert!(output.transitions[1].contains("fixpoint reached"));
    assert_eq!(output.semantic_calls.len(), 1);
}

#[tokio::test]
async fn pass_cap_is_fatal() {
    struct Runaway;
    impl SemanticOracle for Runaway {
        fn transform<'a>(&'a self, request: &'a TransformRequest) -> TransformFuture<'a> {
            Box::pin(async move {
                Ok(TransformResponse::text(format!(
                    "{} more\n@cohere again",
                    request.target_text
                )))
            })
        }
    }
    let compiler = Compiler::new(Runaway, MemoryReader::new())
        .with_config(CompileConfig::default().with_max_passes(5));
    let output = compiler.compile("Start.\n@cohere", &Bindings::new()).await;
    assert!(output.has_errors());
    assert!(output.errors()[0].contains("no fixpoint after 5 passes"));
    assert!(output.errors()[0].contains("@cohere"));
    assert!(output.composed_prompt.starts_with("Start."));
}

// ── Prompts, tools, execution ──────────────────────────────────────

#[tokio::test]
async fn prompts_get_shared_context_and_no_default_key() {
    let source = "\
You are a careful reviewer.
@prompt generate role: system
  Write a draft.
@prompt critique
  Critique the draft.
Reply in English.";
    let output = compile(source, &Bindings::new()).await;
    assert!(!output.prompts.contains_key("default"));
    assert_eq!(
        output.prompts["critique"],
        "You are a careful reviewer.\n\nCritique the draft.\n\nReply in English."
    );
    assert_eq!(output.prompt_roles["generate"], "system");
    assert_eq!(
        output.composed_prompt,
        "You are a careful reviewer.\n\nReply in English."
    );
}

#[tokio::test]
async fn explicit_default_prompt_is_kept() {
    let output = compile("@prompt default\n  Hi.", &Bindings::new()).await;
    assert_eq!(output.prompts["default"], "Hi.");
}

#[tokio::test]
async fn duplicate_tool_keeps_later_declaration() {
    let source = "\
@tool greet
  Say hello.
  - name: string (required)
@tool greet
  Greet someone warmly.
  - name: string (required) — who to greet
  - tone: string enum: [warm, neutral] default: warm";
    let output = compile(source, &Bindings::new()).await;
    assert_eq!(output.tools.len(), 1);
    assert_eq!(output.tools[0].name(), "greet");
    assert_eq!(
        output.tools[0].function.description,
        "Greet someone warmly."
    );
    assert_eq!(output.warnings().len(), 1);

    let json: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();
    let params = &json["tools"][0]["function"]["parameters"];
    assert_eq!(json["tools"][0]["type"], "function");
    assert_eq!(params["required"], serde_json::json!(["name"]));
    assert_eq!(params["properties"]["tone"]["default"], "warm");
}

#[tokio::test]
async fn identical_redeclarations_still_warn() {
    let output = compile("@tool greet\n  Say hi.\n@tool greet\n  Say hi.", &Bindings::new()).await;
    assert_eq!(output.tools.len(), 1);
    assert_eq!(output.warnings().len(), 1);
    assert!(output.warnings()[0].contains("greet"));

    let output = compile("@execute single-call\n@execute single-call\nText.", &Bindings::new()).await;
    assert_eq!(output.composed_prompt, "Text.");
    assert_eq!(output.execution["type"], "single-call");
    assert_eq!(output.warnings().len(), 1);
}

#[tokio::test]
async fn execution_metadata_passes_through() {
    let source = "@execute self-consistency\n  samples: 5\n  aggregation: majority-vote\nAnswer.";
    let output = compile(source, &Bindings::new()).await;
    assert_eq!(output.composed_prompt, "Answer.");
    assert_eq!(
        serde_json::Value::Object(output.execution.clone()),
        serde_json::json!({"type": "self-consistency", "samples": 5, "aggregation": "majority-vote"})
    );
    assert!(output.warnings().is_empty());
}

// ── Refine ─────────────────────────────────────────────────────────

#[tokio::test]
async fn refine_keeps_specialization_requirements() {
    let reader = MemoryReader::new().with_file(
        "base.md",
        "Tone: casual\nYou help with homework.\n@if strict\n  Never give answers directly.",
    );
    let source = "@refine base.md\n  Tone: encouraging\n  You must ask a guiding question first.";
    let output = compiler(reader)
        .compile(source, &Bindings::new().with("strict", true))
        .await;

    assert!(!output.has_errors(), "{:?}", output.errors());
    let text = &output.composed_prompt;
    assert!(text.contains("Tone: encouraging"));
    assert!(text.contains("You must ask a guiding question first."));
    assert!(text.contains("Never give answers directly."));
    assert!(!text.contains("casual"));
    let conflicts: Vec<&String> = output
        .warnings()
        .iter()
        .filter(|w| w.contains("conflicts"))
        .collect();
    assert_eq!(conflicts.len(), 1);
}

#[tokio::test]
async fn refine_cycle_is_reported_with_chain() {
    let reader = MemoryReader::new()
        .with_file("a.md", "@refine b.md\n  A.")
        .with_file("b.md", "@refine a.md\n  B.");
    let output = compiler(reader)
        .compile("@refine a.md\n  Top.", &Bindings::new())
        .await;
    assert!(output.has_errors());
    assert!(output.errors()[0].contains("a.md -> b.md -> a.md"));
}

#[tokio::test]
async fn missing_refine_target_is_fatal_with_partial_output() {
    let output = compile("Intro.\n@refine gone.md", &Bindings::new()).await;
    assert!(output.errors()[0].contains("gone.md"));
    assert!(output.composed_prompt.starts_with("Intro."));
}

// ── Diagnostics ────────────────────────────────────────────────────

#[tokio::test]
async fn seen_diagnostics_are_suppressed() {
    let compiler = compiler(MemoryReader::new());
    let source = "@if flag\n  A";
    let first = compiler.compile(source, &Bindings::new()).await;
    assert_eq!(first.warnings().len(), 1);

    let second = compiler
        .compile_with_seen(source, &Bindings::new(), first.warnings().to_vec())
        .await;
    assert!(second.warnings().is_empty());
}

#[tokio::test]
async fn error_assertion_halts_and_reports() {
    let oracle = Arc::new(EchoOracle::new());
    let compiler = Compiler::new(oracle.clone(), MemoryReader::new());
    let output = compiler
        .compile(
            "Text.\n@assert severity: error contains a Safety section\n@summarize",
            &Bindings::new(),
        )
        .await;
    assert!(output.has_errors());
    assert!(output.errors()[0].contains("Safety"));
    assert_eq!(oracle.call_count(), 0);
}

#[tokio::test]
async fn debug_queries_produce_analysis() {
    let source = "@directives?\n@vars?\n# Goals\nUse {{tone}}.\n@structure?\n@audiance kids";
    let output = compile(source, &Bindings::new().with("tone", "calm")).await;
    assert_eq!(output.analysis.len(), 3);
    assert!(output.analysis[0].contains("1 unknown"));
    assert!(output.analysis[2].contains("1 section heading(s)"));

    let suggestions = &output.diagnostics.suggestions;
    assert!(suggestions.iter().any(|s| s.contains("did you mean @audience?")));
    assert!(suggestions.iter().any(|s| s.contains("structure:") && s.contains("Goals")));
    assert!(output.composed_prompt.contains("@audiance kids"));
}

#[tokio::test]
async fn files_resolve_against_base_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.md"), "Intro.\n@embed file: parts/faq.md").unwrap();
    std::fs::create_dir(dir.path().join("parts")).unwrap();
    std::fs::write(dir.path().join("parts/faq.md"), "Q: why? A: because.").unwrap();

    let compiler = Compiler::new(EchoOracle::new(), FsReader::new(dir.path()));
    let output = compiler
        .compile_file("main.md", &Bindings::new())
        .await
        .unwrap();
    assert_eq!(output.composed_prompt, "Intro.\nQ: why? A: because.");

    let escape = compiler
        .compile("@embed file: ../secret.md", &Bindings::new())
        .await;
    assert!(escape.warnings()[0].contains("escapes"));
}

#[tokio::test]
async fn summarize_reads_its_file() {
    let reader = MemoryReader::new().with_file("notes.md", "Alpha beta gamma.");
    let output = compiler(reader)
        .compile("Intro.\n@summarize file: notes.md\nOutro.", &Bindings::new())
        .await;
    assert_eq!(output.composed_prompt, "Intro.\nAlpha beta gamma.\nOutro.");
    assert!(output.warnings().is_empty(), "{:?}", output.warnings());
}

#[tokio::test]
async fn unreadable_summarize_file_is_dropped_with_warning() {
    let oracle = Arc::new(EchoOracle::new());
    let compiler = Compiler::new(oracle.clone(), MemoryReader::new());
    let output = compiler
        .compile("Intro.\n@summarize file: missing.md\nOutro.", &Bindings::new())
        .await;
    assert_eq!(output.composed_prompt, "Intro.\nOutro.");
    assert_eq!(output.warnings().len(), 1);
    assert!(output.warnings()[0].contains("cannot read 'missing.md'"));
    assert!(!output.has_errors());
    assert_eq!(oracle.call_count(), 0);
}
