use std::path::Path;

use compat_league::bin::{self, BinDocument, BinError, BinField, BinStruct, BinValue};
use compat_league::hash::name_hash;
use serde::Serialize;
use thiserror::Error;

use crate::repath::output_target;
use crate::source_index::SourceIndex;

/// Health bar style written into skins that lack one.
pub const HEALTH_BAR_STYLE: u8 = 12;

const TEXTURE_PATH_HINTS: [&str; 5] = [".dds", ".tga", ".png", "assets/", "characters/"];

struct Names {
    static_material_def: u32,
    sampler_values: u32,
    sampler_name: u32,
    texture_name: u32,
    texture_path: u32,
    skin_character_data_properties: u32,
    character_health_bar_data_record: u32,
    health_bar_data: u32,
    unit_health_bar_style: u32,
}

impl Names {
    fn new() -> Self {
        Self {
            static_material_def: name_hash("StaticMaterialDef"),
            sampler_values: name_hash("SamplerValues"),
            sampler_name: name_hash("SamplerName"),
            texture_name: name_hash("TextureName"),
            texture_path: name_hash("TexturePath"),
            skin_character_data_properties: name_hash("SkinCharacterDataProperties"),
            character_health_bar_data_record: name_hash("CharacterHealthBarDataRecord"),
            health_bar_data: name_hash("HealthBarData"),
            unit_health_bar_style: name_hash("UnitHealthBarStyle"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub sampler_names: usize,
    pub texture_paths: usize,
    pub health_bars: usize,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self.sampler_names == 0 && self.texture_paths == 0 && self.health_bars == 0
    }

    pub fn merge(&mut self, other: RepairReport) {
        self.sampler_names += other.sampler_names;
        self.texture_paths += other.texture_paths;
        self.health_bars += other.health_bars;
    }
}

/// Applies the material and health bar fixups in place.
pub fn repair_document(document: &mut BinDocument) -> RepairReport {
    let names = Names::new();
    let mut report = RepairReport::default();
    for entry in &mut document.entries {
        if entry.type_hash == names.static_material_def {
            for field in &mut entry.fields {
                if field.name_hash != names.sampler_values {
                    continue;
                }
                if let BinValue::List { items, .. } | BinValue::List2 { items, .. } = &mut field.value {
                    for item in items {
                        if let BinValue::Embed(Some(sampler)) | BinValue::Pointer(Some(sampler)) = item {
                            repair_sampler(sampler, &names, &mut report);
                        }
                    }
                }
            }
        } else if entry.type_hash == names.skin_character_data_properties {
            report.health_bars += repair_health_bar(&mut entry.fields, &names);
        }
    }
    report
}

fn repair_sampler(sampler: &mut BinStruct, names: &Names, report: &mut RepairReport) {
    for field in &mut sampler.fields {
        if field.name_hash == names.sampler_name {
            field.name_hash = names.texture_name;
            report.sampler_names += 1;
        }
    }
    let has_path = sampler
        .fields
        .iter()
        .any(|field| field.name_hash == names.texture_path);
    if has_path {
        return;
    }
    for field in &mut sampler.fields {
        if field.name_hash != names.texture_name {
            continue;
        }
        let BinValue::String(value) = &field.value else {
            continue;
        };
        let lower = value.to_ascii_lowercase();
        if TEXTURE_PATH_HINTS.iter().any(|hint| lower.contains(hint)) {
            field.name_hash = names.texture_path;
            report.texture_paths += 1;
        }
    }
}

fn style_field(names: &Names) -> BinField {
    BinField::new(names.unit_health_bar_style, BinValue::U8(HEALTH_BAR_STYLE))
}

/// Returns the number of health bar records changed or added.
fn repair_health_bar(fields: &mut Vec<BinField>, names: &Names) -> usize {
    let mut changed = 0;
    let mut found = false;
    for field in fields.iter_mut() {
        let BinValue::Embed(Some(record)) = &mut field.value else {
            continue;
        };
        if record.class_hash != names.character_health_bar_data_record {
            continue;
        }
        found = true;
        match record
            .fields
            .iter_mut()
            .find(|inner| inner.name_hash == names.unit_health_bar_style)
        {
            Some(style) if style.value == BinValue::U8(HEALTH_BAR_STYLE) => {}
            Some(style) => {
                style.value = BinValue::U8(HEALTH_BAR_STYLE);
                changed += 1;
            }
            None => {
                record.fields.push(style_field(names));
                changed += 1;
            }
        }
    }
    if !found {
        fields.push(BinField::new(
            names.health_bar_data,
            BinValue::Embed(Some(BinStruct {
                class_hash: names.character_health_bar_data_record,
                fields: vec![style_field(names)],
            })),
        ));
        changed += 1;
    }
    changed
}

/// Repairs the document at `path`, rewriting it only when something changed.
pub fn repair_file(path: &Path) -> Result<RepairReport, BinError> {
    let mut document = bin::read_bin(path)?;
    let report = repair_document(&mut document);
    if !report.is_empty() {
        bin::write_bin(&document, path)?;
        tracing::debug!(
            path = %path.display(),
            samplers = report.sampler_names,
            textures = report.texture_paths,
            health_bars = report.health_bars,
            "document repaired"
        );
    }
    Ok(report)
}

#[derive(Debug, Error)]
#[error("repair failed for {path}: {source}")]
pub struct RepairError {
    pub path: String,
    #[source]
    pub source: BinError,
}

/// Repairs the rewritten copies of `roots` under `output_dir`, after linked
/// documents were folded in. The source tree is left untouched.
pub fn repair_outputs(
    roots: &[String],
    index: &SourceIndex,
    output_dir: &Path,
) -> Result<RepairReport, RepairError> {
    let mut total = RepairReport::default();
    for root in roots {
        let Some(file) = index.lookup(root) else {
            continue;
        };
        let (target, _) = output_target(output_dir, &file.relative);
        if !target.is_file() {
            continue;
        }
        let report = repair_file(&target).map_err(|source| RepairError {
            path: file.relative.clone(),
            source,
        })?;
        total.merge(report);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use compat_league::bin::{BinEntry, BinType};

    fn sampler(fields: Vec<BinField>) -> BinValue {
        BinValue::Embed(Some(BinStruct {
            class_hash: name_hash("StaticMaterialShaderSamplerDef"),
            fields,
        }))
    }

    fn string(name: &str, value: &str) -> BinField {
        BinField::new(name_hash(name), BinValue::String(value.to_string()))
    }

    #[test]
    fn sampler_names_become_texture_paths() {
        let mut document = BinDocument {
            entries: vec![BinEntry {
                type_hash: name_hash("StaticMaterialDef"),
                hash: 1,
                fields: vec![BinField::new(
                    name_hash("SamplerValues"),
                    BinValue::List2 {
                        item_type: BinType::Embed,
                        items: vec![
                            sampler(vec![string("SamplerName", "ASSETS/Frog/Diffuse.dds")]),
                            sampler(vec![
                                string("TextureName", "Diffuse_Texture"),
                                string("TexturePath", "assets/x.dds"),
                            ]),
                        ],
                    },
                )],
            }],
            ..BinDocument::default()
        };
        let report = repair_document(&mut document);
        assert_eq!(report.sampler_names, 1);
        assert_eq!(report.texture_paths, 1);

        let BinValue::List2 { items, .. } = &document.entries[0].fields[0].value else {
            panic!("sampler list");
        };
        let BinValue::Embed(Some(first)) = &items[0] else {
            panic!("first sampler");
        };
        assert_eq!(first.fields[0].name_hash, name_hash("TexturePath"));
        let BinValue::Embed(Some(second)) = &items[1] else {
            panic!("second sampler");
        };
        assert_eq!(second.fields[0].name_hash, name_hash("TextureName"));
    }

    #[test]
    fn health_bar_is_added_or_corrected() {
        let skin = name_hash("SkinCharacterDataProperties");
        let mut document = BinDocument {
            entries: vec![
                BinEntry {
                    type_hash: skin,
                    hash: 1,
                    fields: vec![],
                },
                BinEntry {
                    type_hash: skin,
                    hash: 2,
                    fields: vec![BinField::new(
                        name_hash("HealthBarData"),
                        BinValue::Embed(Some(BinStruct {
                            class_hash: name_hash("CharacterHealthBarDataRecord"),
                            fields: vec![BinField::new(
                                name_hash("UnitHealthBarStyle"),
                                BinValue::U8(3),
                            )],
                        })),
                    )],
                },
            ],
            ..BinDocument::default()
        };
        let report = repair_document(&mut document);
        assert_eq!(report.health_bars, 2);
        for entry in &document.entries {
            let field = entry.field(name_hash("HealthBarData")).expect("health bar");
            let BinValue::Embed(Some(record)) = &field.value else {
                panic!("embedded record");
            };
            assert_eq!(record.fields[0].value, BinValue::U8(HEALTH_BAR_STYLE));
        }
        assert!(repair_document(&mut document).is_empty());
    }

    #[test]
    fn outputs_are_repaired_and_source_is_not() {
        let dir = tempfile::tempdir().expect("tempdir");
        let document = BinDocument {
            entries: vec![BinEntry {
                type_hash: name_hash("StaticMaterialDef"),
                hash: 7,
                fields: vec![BinField::new(
                    name_hash("SamplerValues"),
                    BinValue::List2 {
                        item_type: BinType::Embed,
                        items: vec![sampler(vec![string("SamplerName", "Diffuse_Texture")])],
                    },
                )],
            }],
            ..BinDocument::default()
        };
        let source = dir.path().join("source");
        let out = dir.path().join("out");
        for root in [&source, &out] {
            let path = root.join("data/frog.bin");
            std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            bin::write_bin(&document, &path).expect("write");
        }
        let before = std::fs::read(source.join("data/frog.bin")).expect("read");

        let index = SourceIndex::build(&source).expect("index");
        let roots = ["DATA/Frog.bin".to_string(), "data/absent.bin".to_string()];
        let report = repair_outputs(&roots, &index, &out).expect("repair");
        assert_eq!(report.sampler_names, 1);
        assert_eq!(std::fs::read(source.join("data/frog.bin")).expect("read"), before);
        assert_ne!(std::fs::read(out.join("data/frog.bin")).expect("read"), before);
    }
}
