//! Prompt and tool definitions for the incremental translator
//!
//! The model never answers in free text: every response goes through one of
//! the three tools below, which is how the translator keeps its state machine
//! in sync with the model.

use crate::domain::chat::ToolDef;
use serde_json::json;

/// Name of the tool that submits a translated utterance.
pub const TOOL_TRANSLATE: &str = "translate";

/// Name of the tool that retracts a previously emitted translation.
pub const TOOL_DELETE_TURN: &str = "delete_turn";

/// Name of the tool that declines to translate the current input.
pub const TOOL_PASS: &str = "pass";

/// System instruction for the translator conversation.
///
/// The target language is appended so the cached prefix stays identical
/// across sessions with the same configuration.
pub fn system_prompt(lang_to: &str) -> String {
    format!(
        "You are a translator. The user provides the output of an ASR \
         service. Your job is to interpret who said what (keep in mind \
         that the ASR makes mistakes) and report properly formatted and \
         constructed sentences using the available tools: call `translate` \
         once or several times at each turn, `delete_turn` to retract a \
         translation that newer context proved wrong, or `pass` when the \
         input cannot be translated. The target language is: {lang_to}"
    )
}

/// The tools offered to the model on every completion call.
pub fn build_tools(lang_to: &str) -> Vec<ToolDef> {
    vec![
        ToolDef::function(
            TOOL_TRANSLATE,
            "⚠ CALL THIS FUNCTION TO SUBMIT YOUR ANSWER ⚠\n\n\
             You receive messy ASR transcription with errors, overlaps, and \
             incomplete words. DO NOT ask for help or tools. YOU must:\n\
             1. Fix ASR errors and typos\n\
             2. Separate overlapping speech\n\
             3. Remove stutters and filler words\n\
             4. Create grammatically correct sentences\n\
             5. Translate to target language\n\
             6. CALL THIS FUNCTION with the result\n\n\
             The function parameters are where you write your cleaned, \
             translated output."
                .to_string(),
            json!({
                "type": "object",
                "properties": {
                    "speaker": {
                        "type": "string",
                        "description": "Speaker name/ID from the input",
                    },
                    "text": {
                        "type": "string",
                        "description": format!(
                            "⚠ PUT YOUR CLEANED & TRANSLATED TEXT HERE ⚠ - \
                             This is your final answer: properly formatted, \
                             error-free, translated into {lang_to} sentences"
                        ),
                    },
                    "comment": {
                        "type": "string",
                        "description": "Translation comments. Leave blank \
                             unless there is something really important to say.",
                    },
                },
                "required": ["speaker", "text"],
            }),
        ),
        ToolDef::function(
            TOOL_DELETE_TURN,
            "A translation you submitted earlier turned out to be wrong or \
             redundant given newer context (for example the speaker finished \
             a sentence you already translated a fragment of). Call this \
             function with the id that the `translate` call returned to \
             retract it, then submit the corrected translation."
                .to_string(),
            json!({
                "type": "object",
                "properties": {
                    "turn_id": {
                        "type": "integer",
                        "description": "Id of the translated turn to retract, \
                             as returned by the translate function.",
                    },
                },
                "required": ["turn_id"],
            }),
        ),
        ToolDef::function(
            TOOL_PASS,
            "The input might be gibberish, incomplete or too out-of-context \
             to be translated. In this case, call that function."
                .to_string(),
            json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "A potential question you might have \
                             regarding the input. Only fill if necessary.",
                    },
                },
            }),
        ),
    ]
}
