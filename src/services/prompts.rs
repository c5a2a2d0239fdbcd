use crate::core::state::ContinuationPolicy;
use log::warn;

/// The fixed set of illustration styles the UI offers. Each key maps to the
/// textual style description woven into every prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtStyle {
    #[default]
    Watercolor,
    Crayon,
    Comic,
    PixelArt,
    Claymation,
    Papercut,
}

impl ArtStyle {
    pub fn from_key(key: &str) -> Self {
        match key {
            "watercolor" => Self::Watercolor,
            "crayon" => Self::Crayon,
            "comic" => Self::Comic,
            "pixel" | "pixel-art" => Self::PixelArt,
            "claymation" => Self::Claymation,
            "papercut" => Self::Papercut,
            other => {
                warn!("unknown art style '{}', defaulting to watercolor", other);
                Self::Watercolor
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Watercolor => {
                "soft watercolor children's book illustration with gentle pastel washes and warm light"
            }
            Self::Crayon => {
                "hand-drawn crayon illustration with bold waxy strokes, like a child's drawing come to life"
            }
            Self::Comic => {
                "bright comic-book illustration with clean ink outlines and flat cheerful colors"
            }
            Self::PixelArt => {
                "retro pixel-art illustration with a limited palette and chunky friendly sprites"
            }
            Self::Claymation => {
                "claymation-style illustration with soft modeled figures and visible clay texture"
            }
            Self::Papercut => {
                "layered paper-cutout illustration with crisp edges and subtle drop shadows"
            }
        }
    }
}

/// Illustrations come in two orientations; anything unrecognized falls back
/// to landscape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Landscape,
    Portrait,
}

impl AspectRatio {
    pub fn from_key(key: &str) -> Self {
        match key {
            "16:9" | "landscape" => Self::Landscape,
            "9:16" | "portrait" => Self::Portrait,
            other => {
                warn!("unknown aspect ratio '{}', defaulting to 16:9", other);
                Self::Landscape
            }
        }
    }

    pub fn descriptor(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9 landscape",
            Self::Portrait => "9:16 portrait",
        }
    }
}

fn ending_rule(mode: ContinuationPolicy) -> &'static str {
    match mode {
        ContinuationPolicy::Conclude => {
            "End the final paragraph with a warm, definitive ending."
        }
        ContinuationPolicy::Extend => {
            "End the final paragraph on an open cliffhanger that invites more scenes."
        }
    }
}

pub fn story_system_prompt() -> String {
    "You are a children's story author. Respond only with valid JSON matching the requested schema.".to_string()
}

pub fn story_prompt(
    language: &str,
    style: ArtStyle,
    scene_count: usize,
    mode: ContinuationPolicy,
) -> String {
    format!(
        "Write a children's story in {language} about the character(s) shown in the attached reference image(s).\
        \n\nRules:\
        \n- Write exactly {scene_count} short paragraphs, one narrative beat each, all in {language}.\
        \n- Give the story a short title in {language}.\
        \n- Illustration style: {style}.\
        \n- {ending}\
        \n- For each paragraph, also write one self-contained image-generation prompt that depicts that paragraph in the illustration style above and keeps the characters' appearance consistent with the reference image(s).\
        \n\nReturn a JSON object with the fields \"title\", \"paragraphs\" and \"imagePrompts\". Both lists must have exactly {scene_count} entries, in matching order.",
        language = language,
        scene_count = scene_count,
        style = style.description(),
        ending = ending_rule(mode),
    )
}

pub fn continuation_prompt(
    existing: &[String],
    language: &str,
    style: ArtStyle,
    scene_count: usize,
    mode: ContinuationPolicy,
) -> String {
    let numbered = existing
        .iter()
        .enumerate()
        .map(|(i, paragraph)| format!("{}. {}", i + 1, paragraph))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Here is a children's story in {language} about the character(s) shown in the attached reference image(s).\
        \n\nThe story so far:\n{numbered}\
        \n\nContinue it with exactly {scene_count} new paragraphs.\
        \n\nRules:\
        \n- Stay coherent with the story so far and do not repeat earlier events.\
        \n- Write every new paragraph in {language}.\
        \n- Illustration style: {style}.\
        \n- {ending}\
        \n- For each new paragraph, also write one self-contained image-generation prompt that depicts that paragraph in the illustration style above and keeps the characters' appearance consistent with the reference image(s).\
        \n\nReturn a JSON object with the fields \"paragraphs\" and \"imagePrompts\", covering only the new paragraphs. Both lists must have exactly {scene_count} entries, in matching order.",
        language = language,
        numbered = numbered,
        scene_count = scene_count,
        style = style.description(),
        ending = ending_rule(mode),
    )
}

pub fn image_prompt(scene_prompt: &str, aspect: AspectRatio) -> String {
    format!(
        "{scene_prompt}\
        \n\nUse the attached reference image(s) for the characters: preserve their faces, proportions, colors and outfits exactly. \
        Compose the illustration in {aspect} format.",
        scene_prompt = scene_prompt,
        aspect = aspect.descriptor(),
    )
}

pub fn video_prompt(paragraph: &str, style: ArtStyle, language: &str) -> String {
    format!(
        "The attached illustration shows this scene from a children's story:\n{paragraph}\
        \n\nWrite in {language} a short motion prompt (one or two sentences) describing camera movement and subtle animation that would bring this illustration to life as a brief video clip. \
        Match the {style} and keep the characters consistent with the reference image(s). \
        Return only the motion description, no preamble.",
        paragraph = paragraph,
        language = language,
        style = style.description(),
    )
}

pub fn edit_prompt(instruction: &str) -> String {
    format!(
        "Edit the attached illustration: {instruction}.\
        \nApply only this change. Keep the art style, the composition and the characters' design from the reference image(s) unchanged.",
        instruction = instruction,
    )
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[test]
    fn test_art_style_key_defaulting() {
        assert_eq!(ArtStyle::from_key("comic"), ArtStyle::Comic);
        assert_eq!(ArtStyle::from_key("pixel"), ArtStyle::PixelArt);
        assert_eq!(ArtStyle::from_key("oil-on-canvas"), ArtStyle::Watercolor);
    }

    #[test]
    fn test_aspect_ratio_key_defaulting() {
        assert_eq!(AspectRatio::from_key("9:16"), AspectRatio::Portrait);
        assert_eq!(AspectRatio::from_key("16:9"), AspectRatio::Landscape);
        assert_eq!(AspectRatio::from_key("4:3"), AspectRatio::Landscape);
    }

    #[test]
    fn test_story_prompt_carries_constraints() {
        let prompt = story_prompt("Spanish", ArtStyle::Comic, 5, ContinuationPolicy::Extend);
        assert!(prompt.contains("exactly 5 short paragraphs"));
        assert!(prompt.contains("Spanish"));
        assert!(prompt.contains(ArtStyle::Comic.description()));
        assert!(prompt.contains("cliffhanger"));
        assert!(prompt.contains("\"imagePrompts\""));
    }

    #[test]
    fn test_continuation_prompt_numbers_history() {
        let existing = vec!["A cat sat.".to_string(), "It napped.".to_string()];
        let prompt = continuation_prompt(
            &existing,
            "English",
            ArtStyle::Watercolor,
            3,
            ContinuationPolicy::Conclude,
        );
        assert!(prompt.contains("1. A cat sat."));
        assert!(prompt.contains("2. It napped."));
        assert!(prompt.contains("exactly 3 new paragraphs"));
        assert!(prompt.contains("definitive ending"));
        assert!(!prompt.contains("\"title\""));
    }

    #[test]
    fn test_image_prompt_carries_aspect_descriptor() {
        let prompt = image_prompt("a cat on a roof", AspectRatio::Portrait);
        assert!(prompt.contains("a cat on a roof"));
        assert!(prompt.contains("9:16 portrait"));
    }
}
