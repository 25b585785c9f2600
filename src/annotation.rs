use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::instrument;

use crate::{
    config::{DuplicatePolicy, ImageFormat},
    BoundingBox, Error, Region, Result, SourceImage,
};

#[derive(Debug, Deserialize)]
struct VocAnnotation {
    #[serde(rename = "object", default)]
    objects: Vec<VocObject>,
}

#[derive(Debug, Deserialize)]
struct VocObject {
    name: Option<String>,
    bndbox: Option<VocBox>,
}

#[derive(Debug, Deserialize)]
struct VocBox {
    xmin: Option<String>,
    ymin: Option<String>,
    xmax: Option<String>,
    ymax: Option<String>,
}

/// An annotation file together with the image it describes.
#[derive(Debug, Clone)]
pub struct LoadedAnnotation {
    pub image_path: PathBuf,
    pub image: SourceImage,
    pub regions: Vec<Region>,
}

impl LoadedAnnotation {
    pub fn boxes(&self) -> Vec<BoundingBox> {
        self.regions.iter().map(|region| region.bbox).collect()
    }

    pub fn labels(&self) -> Vec<Option<&str>> {
        self.regions
            .iter()
            .map(|region| region.label.as_deref())
            .collect()
    }
}

/// Image belonging to an annotation: same stem, `.jpg` extension. Paths
/// without an extension are treated as stems.
pub fn image_path_for(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("xml") => path.with_extension("jpg"),
        None => path.with_extension("jpg"),
        Some(_) => path.to_path_buf(),
    }
}

/// Loads a Pascal VOC annotation and its image.
#[instrument(level = "debug")]
pub fn load(
    path: &Path,
    format: ImageFormat,
    duplicates: DuplicatePolicy,
) -> Result<LoadedAnnotation> {
    let text = std::fs::read_to_string(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => Error::AnnotationNotFound(path.to_path_buf()),
        _ => Error::Io(err),
    })?;
    let regions = parse_regions(&text, duplicates).map_err(|reason| {
        Error::MalformedAnnotation {
            path: path.to_path_buf(),
            reason,
        }
    })?;
    log::debug!("Parsed {} regions from {}", regions.len(), path.display());

    let image_path = image_path_for(path);
    let image = load_image(&image_path, format)?;

    Ok(LoadedAnnotation {
        image_path,
        image,
        regions,
    })
}

/// Loads the image for `path`, which may be the image itself, its annotation
/// or their common stem.
#[instrument(level = "debug")]
pub fn load_image(path: &Path, format: ImageFormat) -> Result<SourceImage> {
    let path = image_path_for(path);
    if !path.is_file() {
        return Err(Error::ImageNotFound(path));
    }
    let image = image::open(&path)?;
    log::trace!(
        "Loaded {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(SourceImage::from_image(image, format))
}

fn parse_regions(text: &str, duplicates: DuplicatePolicy) -> Result<Vec<Region>, String> {
    let annotation: VocAnnotation = quick_xml::de::from_str(text).map_err(|err| err.to_string())?;

    let mut regions: Vec<Region> = Vec::with_capacity(annotation.objects.len());
    let mut positions = HashMap::<BoundingBox, usize>::new();
    for (index, object) in annotation.objects.into_iter().enumerate() {
        let region = parse_object(object).map_err(|reason| format!("object {index}: {reason}"))?;
        match duplicates {
            DuplicatePolicy::KeepAll => regions.push(region),
            DuplicatePolicy::LastWriteWins => match positions.get(&region.bbox) {
                Some(&position) => {
                    log::debug!("Duplicate box {:?}, replacing label", region.bbox);
                    regions[position].label = region.label;
                }
                None => {
                    positions.insert(region.bbox, regions.len());
                    regions.push(region);
                }
            },
        }
    }
    Ok(regions)
}

fn parse_object(object: VocObject) -> Result<Region, String> {
    let label = object
        .name
        .filter(|name| !name.is_empty())
        .ok_or("missing label text")?;
    let bndbox = object.bndbox.ok_or("missing bndbox")?;
    let coordinate = |value: Option<String>, field: &str| -> Result<i32, String> {
        let value = value.ok_or_else(|| format!("missing {field}"))?;
        value
            .trim()
            .parse::<i32>()
            .map_err(|_| format!("{field} is not an integer: {value:?}"))
    };
    let bbox = BoundingBox::new(
        coordinate(bndbox.xmin, "xmin")?,
        coordinate(bndbox.ymin, "ymin")?,
        coordinate(bndbox.xmax, "xmax")?,
        coordinate(bndbox.ymax, "ymax")?,
    );
    Ok(Region::labeled(bbox, label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(label: &str, bbox: (i32, i32, i32, i32)) -> String {
        format!(
            "<object><name>{label}</name><pose>Unspecified</pose><bndbox>\
             <xmin>{}</xmin><ymin>{}</ymin><xmax>{}</xmax><ymax>{}</ymax>\
             </bndbox></object>",
            bbox.0, bbox.1, bbox.2, bbox.3
        )
    }

    fn document(objects: &[String]) -> String {
        format!(
            "<annotation><folder>scans</folder><filename>page.jpg</filename>\
             <size><width>100</width><height>50</height><depth>3</depth></size>{}</annotation>",
            objects.concat()
        )
    }

    #[test]
    fn parses_regions_in_file_order() {
        let text = document(&[object("hello", (1, 2, 30, 12)), object("world", (40, 2, 80, 12))]);
        let regions = parse_regions(&text, DuplicatePolicy::LastWriteWins).unwrap();
        assert_eq!(
            regions,
            vec![
                Region::labeled((1, 2, 30, 12), "hello"),
                Region::labeled((40, 2, 80, 12), "world"),
            ]
        );
    }

    #[test]
    fn duplicate_boxes_collapse_to_last_label() {
        let text = document(&[
            object("first", (1, 2, 30, 12)),
            object("other", (40, 2, 80, 12)),
            object("last", (1, 2, 30, 12)),
        ]);
        let regions = parse_regions(&text, DuplicatePolicy::LastWriteWins).unwrap();
        assert_eq!(
            regions,
            vec![
                Region::labeled((1, 2, 30, 12), "last"),
                Region::labeled((40, 2, 80, 12), "other"),
            ]
        );
    }

    #[test]
    fn keep_all_preserves_duplicates() {
        let text = document(&[object("first", (1, 2, 30, 12)), object("last", (1, 2, 30, 12))]);
        let regions = parse_regions(&text, DuplicatePolicy::KeepAll).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].label.as_deref(), Some("first"));
    }

    #[test]
    fn annotation_without_objects_is_empty() {
        let regions = parse_regions(&document(&[]), DuplicatePolicy::LastWriteWins).unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn missing_fields_are_malformed() {
        let no_name = "<annotation><object><bndbox><xmin>1</xmin><ymin>1</ymin>\
                       <xmax>5</xmax><ymax>5</ymax></bndbox></object></annotation>";
        let no_ymax = "<annotation><object><name>a</name><bndbox><xmin>1</xmin>\
                       <ymin>1</ymin><xmax>5</xmax></bndbox></object></annotation>";
        let no_box = "<annotation><object><name>a</name></object></annotation>";
        let float = object("a", (1, 1, 5, 5)).replace("<xmin>1</xmin>", "<xmin>1.5</xmin>");
        let float = document(&[float]);

        for text in [no_name, no_ymax, no_box, float.as_str()] {
            assert!(
                parse_regions(text, DuplicatePolicy::LastWriteWins).is_err(),
                "{text}"
            );
        }
    }

    #[test]
    fn image_path_uses_jpg_sibling() {
        assert_eq!(
            image_path_for(Path::new("data/kr001-4.xml")),
            PathBuf::from("data/kr001-4.jpg")
        );
        assert_eq!(
            image_path_for(Path::new("data/kr001")),
            PathBuf::from("data/kr001.jpg")
        );
        assert_eq!(
            image_path_for(Path::new("data/kr001.png")),
            PathBuf::from("data/kr001.png")
        );
    }
}
