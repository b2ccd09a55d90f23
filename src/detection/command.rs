use anyhow::{Context, Result, bail};
use std::process::Command;
use tracing::debug;

use super::{DetectionRequest, FaceDetection, FaceDetector};

/// Detector backed by an external program
///
/// The configured command line is run through `sh -c` once per image after
/// placeholder substitution:
///
/// | placeholder    | value                                        |
/// |----------------|----------------------------------------------|
/// | `{image}`      | image path (shell quoted)                    |
/// | `{output_dir}` | folder for annotated output (shell quoted)   |
/// | `{annotate}`   | `true` or `false`                            |
/// | `{model}`      | model name                                   |
///
/// The program must print a JSON array of detections
/// (`{"x1", "y1", "x2", "y2", "confidence", "landmarks"?}`) on stdout.
/// Empty output means no faces.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    model: String,
    template: String,
}

impl CommandDetector {
    pub fn new(model: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            template: template.into(),
        }
    }

    /// Command line for one request
    pub fn render(&self, request: &DetectionRequest) -> String {
        self.template
            .replace("{image}", &shell_quote(&request.image_path.to_string_lossy()))
            .replace("{output_dir}", &shell_quote(&request.output_folder.to_string_lossy()))
            .replace("{annotate}", if request.save_annotated { "true" } else { "false" })
            .replace("{model}", &self.model)
    }
}

impl FaceDetector for CommandDetector {
    fn detect(&mut self, request: &DetectionRequest) -> Result<Vec<FaceDetection>> {
        if request.save_annotated {
            std::fs::create_dir_all(&request.output_folder).with_context(|| {
                format!("Failed to create output folder {}", request.output_folder.display())
            })?;
        }

        let command_str = self.render(request);
        debug!(model = %self.model, command = %command_str, "Running detector command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command_str)
            .output()
            .with_context(|| format!("Failed to run detector command for '{}'", self.model))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Detector command failed ({}): {}", output.status, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(stdout)
            .with_context(|| format!("Detector '{}' printed invalid detections", self.model))
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_render_quotes_paths() {
        let template = "detect --model {model} {image} {output_dir} {annotate}";
        let detector = CommandDetector::new("blazeface", template);
        let request =
            DetectionRequest::new("/tmp/my images/bob's.jpg", "/tmp/out").with_annotation(true);

        assert_eq!(
            detector.render(&request),
            r"detect --model blazeface '/tmp/my images/bob'\''s.jpg' '/tmp/out' true"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_parses_stdout() {
        let temp_dir = TempDir::new().unwrap();
        let image = temp_dir.path().join("face.jpg");
        fs::write(&image, r#"[{"x1": 1, "y1": 2, "x2": 30, "y2": 40, "confidence": 0.8}]"#).unwrap();

        let mut detector = CommandDetector::new("fake", "cat {image}");
        let detections = detector
            .detect(&DetectionRequest::new(&image, temp_dir.path()))
            .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox.x2, 30.0);
        assert_eq!(detections[0].bbox.confidence, 0.8);
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_output_means_no_faces() {
        let mut detector = CommandDetector::new("fake", "true");
        let detections = detector
            .detect(&DetectionRequest::new("/nonexistent.jpg", "out"))
            .unwrap();
        assert!(detections.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_reports_stderr() {
        let mut detector = CommandDetector::new("fake", "echo 'model weights missing' >&2; exit 3");
        let err = detector
            .detect(&DetectionRequest::new("/nonexistent.jpg", "out"))
            .unwrap_err();
        assert!(err.to_string().contains("model weights missing"));
    }

    #[cfg(unix)]
    #[test]
    fn test_invalid_json_is_an_error() {
        let mut detector = CommandDetector::new("fake", "echo not-json");
        let err = detector
            .detect(&DetectionRequest::new("/nonexistent.jpg", "out"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid detections"));
    }

    #[cfg(unix)]
    #[test]
    fn test_annotation_creates_output_folder() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("annotated").join("face");

        let mut detector = CommandDetector::new("fake", "true");
        detector
            .detect(&DetectionRequest::new("/nonexistent.jpg", &output).with_annotation(true))
            .unwrap();

        assert!(output.is_dir());
    }
}
