//! XML metadata written next to camera recordings.
//!
//! A recording named `{date}_{id}_{run}_{camera model tokens}.dat` has its
//! acquisition metadata in `{date}_{id}_{run}.xml`:
//!
//! ```xml
//! <recordingMetaData>
//!   <general>
//!     <comment>...</comment>
//!     <recordingTime unit="ms">2000</recordingTime>
//!   </general>
//!   <Cameras>
//!     <Camera model="Some Model">
//!       <Profile><value name="Framerate" value="500"/></Profile>
//!     </Camera>
//!   </Cameras>
//! </recordingMetaData>
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use xmltree::{Element, EmitterConfig, XMLNode};

use crate::error::{FormatError, Result};

const ROOT: &str = "recordingMetaData";

/// Where the sidecar of `dat_path` lives, and the camera model encoded in the name.
///
/// `None` when the file stem has three or fewer `_`-separated tokens.
pub fn locate(dat_path: &Path) -> Option<(PathBuf, String)> {
    let stem = dat_path.file_stem()?.to_str()?;
    let parts: Vec<&str> = stem.split('_').filter(|s| !s.is_empty()).collect();
    if parts.len() <= 3 {
        return None;
    }
    let name = format!("{}_{}_{}.xml", parts[0], parts[1], parts[2]);
    let path = dat_path.parent().map_or_else(|| PathBuf::from(&name), |p| p.join(&name));
    Some((path, parts[3..].join(" ")))
}

/// A loaded sidecar document.
#[derive(Debug)]
pub struct Sidecar {
    path: PathBuf,
    root: Element,
}

impl Sidecar {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| FormatError::io(&path, e))?;
        let root = Element::parse(BufReader::new(file)).map_err(|e| FormatError::Xml {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { path, root })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn general(&self) -> Option<&Element> {
        (self.root.name == ROOT)
            .then_some(&self.root)?
            .get_child("general")
    }

    pub fn comment(&self) -> Option<String> {
        let text = self.general()?.get_child("comment")?.get_text()?;
        Some(text.into_owned())
    }

    /// `general/recordingTime`, only when given in milliseconds.
    pub fn recording_time_ms(&self) -> Option<u64> {
        let node = self.general()?.get_child("recordingTime")?;
        if node.attributes.get("unit").map(String::as_str) != Some("ms") {
            return None;
        }
        node.get_text()?.trim().parse().ok()
    }

    /// `value` attribute of the named profile entry of one camera model.
    pub fn profile_value(&self, model: &str, name: &str) -> Option<String> {
        if self.root.name != ROOT {
            return None;
        }
        let camera = child_elements(self.root.get_child("Cameras")?).find(|e| {
            e.name == "Camera" && e.attributes.get("model").map(String::as_str) == Some(model)
        })?;
        let value = child_elements(camera.get_child("Profile")?).find(|e| {
            e.name == "value" && e.attributes.get("name").map(String::as_str) == Some(name)
        })?;
        value.attributes.get("value").filter(|v| !v.is_empty()).cloned()
    }

    /// Replace the comment and write the document back.
    ///
    /// The first edit moves the untouched file to `<name>.original`.
    pub fn set_comment(&mut self, comment: &str) -> Result<()> {
        let backup = backup_path(&self.path);
        if !backup.is_file() {
            std::fs::rename(&self.path, &backup).map_err(|e| FormatError::io(&self.path, e))?;
            info!(path = %backup.display(), "saved original sidecar");
        }

        if self.root.name == ROOT {
            if self.root.get_child("general").is_none() {
                self.root
                    .children
                    .push(XMLNode::Element(Element::new("general")));
            }
            if let Some(general) = self.root.get_mut_child("general") {
                if general.get_child("comment").is_none() {
                    general.children.push(XMLNode::Element(Element::new("comment")));
                }
                if let Some(node) = general.get_mut_child("comment") {
                    node.children = vec![XMLNode::Text(comment.to_string())];
                }
            }
        }

        self.save()
    }

    fn save(&self) -> Result<()> {
        let file = File::create(&self.path).map_err(|e| FormatError::io(&self.path, e))?;
        let config = EmitterConfig::new()
            .perform_indent(true)
            .indent_string(" ")
            .write_document_declaration(false);
        self.root
            .write_with_config(file, config)
            .map_err(|e| FormatError::Xml {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        debug!(path = %self.path.display(), "wrote sidecar");
        Ok(())
    }
}

fn child_elements(parent: &Element) -> impl Iterator<Item = &Element> {
    parent.children.iter().filter_map(|node| match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".original");
    path.with_file_name(name)
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = r#"<recordingMetaData>
 <general>
  <comment>from xml</comment>
  <recordingTime unit="ms">2000</recordingTime>
 </general>
 <Cameras>
  <Camera model="Other">
   <Profile><value name="Framerate" value="1"/></Profile>
  </Camera>
  <Camera model="Cam X2">
   <Profile>
    <value name="Framerate" value="250.5"/>
    <value name="Gain" value="12"/>
    <value name="Exposure" value="1.2345"/>
   </Profile>
  </Camera>
 </Cameras>
</recordingMetaData>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::unique_temp_dir;

    #[test]
    fn locates_sidecar_from_name_tokens() {
        let (path, model) = locate(Path::new("/data/2021_04_01_Cam_X2.dat")).unwrap();
        assert_eq!(path, Path::new("/data/2021_04_01.xml"));
        assert_eq!(model, "Cam X2");

        assert!(locate(Path::new("/data/2021_04_01.dat")).is_none());
        // empty tokens are skipped
        let (path, model) = locate(Path::new("a__b_c_d.dat")).unwrap();
        assert_eq!(path, Path::new("a_b_c.xml"));
        assert_eq!(model, "d");
    }

    #[test]
    fn reads_general_and_profile_values() {
        let dir = unique_temp_dir("sidecar-read");
        let path = dir.join("a_b_c.xml");
        std::fs::write(&path, SAMPLE).unwrap();

        let sidecar = Sidecar::load(&path).expect("sidecar should parse");
        assert_eq!(sidecar.comment().as_deref(), Some("from xml"));
        assert_eq!(sidecar.recording_time_ms(), Some(2000));
        assert_eq!(
            sidecar.profile_value("Cam X2", "Framerate").as_deref(),
            Some("250.5")
        );
        assert_eq!(sidecar.profile_value("Cam X2", "Missing"), None);
        assert_eq!(sidecar.profile_value("Nope", "Gain"), None);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn recording_time_requires_ms_unit() {
        let dir = unique_temp_dir("sidecar-unit");
        let path = dir.join("a_b_c.xml");
        std::fs::write(
            &path,
            r#"<recordingMetaData><general><recordingTime unit="s">2</recordingTime></general></recordingMetaData>"#,
        )
        .unwrap();

        let sidecar = Sidecar::load(&path).unwrap();
        assert_eq!(sidecar.recording_time_ms(), None);
        assert_eq!(sidecar.comment(), None);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn set_comment_backs_up_once_and_saves() {
        let dir = unique_temp_dir("sidecar-write");
        let path = dir.join("a_b_c.xml");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut sidecar = Sidecar::load(&path).unwrap();
        sidecar.set_comment("first edit").expect("edit should succeed");
        sidecar.set_comment("second edit").expect("edit should succeed");

        let backup = std::fs::read_to_string(dir.join("a_b_c.xml.original")).unwrap();
        assert_eq!(backup, SAMPLE);

        let reloaded = Sidecar::load(&path).unwrap();
        assert_eq!(reloaded.comment().as_deref(), Some("second edit"));
        assert_eq!(reloaded.recording_time_ms(), Some(2000));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let dir = unique_temp_dir("sidecar-bad");
        let path = dir.join("a_b_c.xml");
        std::fs::write(&path, "<recordingMetaData><general>").unwrap();

        assert!(matches!(
            Sidecar::load(&path),
            Err(FormatError::Xml { .. })
        ));

        std::fs::remove_dir_all(dir).ok();
    }
}
