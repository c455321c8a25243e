//! Model construction: pretrained backbone with a fresh head, or a full restore

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{CompactRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::{info, warn};

use super::checkpoint::{metadata_file, weights_file, CheckpointMetadata};
use super::resnet::{ResNetBackbone, ResNetBackboneRecord, SceneClassifierRecord};
use super::{ResNetConfig, SceneClassifier};
use crate::utils::error::{Result, SceneError};

/// Builds [`SceneClassifier`]s for one architecture
#[derive(Debug, Clone)]
pub struct ModelBuilder<B: Backend> {
    config: ResNetConfig,
    pretrained: Option<PathBuf>,
    device: B::Device,
}

impl<B: Backend> ModelBuilder<B> {
    pub fn new(config: ResNetConfig, device: B::Device) -> Self {
        Self {
            config,
            pretrained: None,
            device,
        }
    }

    /// torchvision `resnet50` state dict used for the backbone of new models
    pub fn with_pretrained(mut self, path: Option<PathBuf>) -> Self {
        self.pretrained = path;
        self
    }

    pub fn config(&self) -> &ResNetConfig {
        &self.config
    }

    /// Build a model with `num_classes` outputs
    ///
    /// Without `restore`, the backbone comes from the pretrained file (or is
    /// randomly initialized when none is configured) and the classification
    /// layer is new. With `restore`, every weight comes from that file.
    pub fn build(&self, num_classes: usize, restore: Option<&Path>) -> Result<SceneClassifier<B>> {
        let config = self.config.for_classes(num_classes);
        match restore {
            Some(path) => self.restore(&config, path),
            None => {
                let backbone = self.backbone(&config)?;
                Ok(SceneClassifier::new(backbone, &config, &self.device))
            }
        }
    }

    fn backbone(&self, config: &ResNetConfig) -> Result<ResNetBackbone<B>> {
        let backbone = config.init_backbone::<B>(&self.device);
        let Some(path) = &self.pretrained else {
            warn!("No pretrained weights configured, backbone is randomly initialized");
            return Ok(backbone);
        };

        if !path.is_file() {
            return Err(SceneError::Load(format!(
                "pretrained weights {} not found",
                path.display()
            )));
        }

        // torchvision stores the projection shortcut as an nn.Sequential
        let args = LoadArgs::new(path.clone())
            .with_key_remap(r"(.+)\.downsample\.0\.(.+)", "$1.downsample.conv.$2")
            .with_key_remap(r"(.+)\.downsample\.1\.(.+)", "$1.downsample.bn.$2");
        let record: ResNetBackboneRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(args, &self.device)
            .map_err(|e| SceneError::Load(format!("{}: {e:?}", path.display())))?;
        check_backbone(config, &record)
            .map_err(|reason| SceneError::Load(format!("{}: {reason}", path.display())))?;

        info!(path = %path.display(), "Loaded pretrained backbone");
        Ok(backbone.load_record(record))
    }

    fn restore(&self, config: &ResNetConfig, path: &Path) -> Result<SceneClassifier<B>> {
        let weights = weights_file(path);
        if !weights.is_file() {
            return Err(SceneError::Load(format!(
                "weight file {} not found",
                weights.display()
            )));
        }

        let sidecar = metadata_file(path);
        if sidecar.is_file() {
            CheckpointMetadata::load(&sidecar)?.check_compatible(config)?;
        }

        let record: SceneClassifierRecord<B> =
            <CompactRecorder as Recorder<B>>::load(&CompactRecorder::new(), path.to_path_buf(), &self.device)
                .map_err(|e| SceneError::Load(format!("{}: {e:?}", weights.display())))?;
        check_record(config, &record)
            .map_err(|reason| SceneError::Load(format!("{}: {reason}", weights.display())))?;
        let model = config.init::<B>(&self.device).load_record(record);

        info!(path = %weights.display(), "Restored model");
        Ok(model)
    }
}

/// Compare a loaded backbone record with the configured stages and stem
///
/// Burn panics when a record's stage lengths differ from the module, so every
/// structural difference is caught here first.
fn check_backbone<B: Backend>(
    config: &ResNetConfig,
    backbone: &ResNetBackboneRecord<B>,
) -> std::result::Result<(), String> {
    let blocks = [
        backbone.layer1.len(),
        backbone.layer2.len(),
        backbone.layer3.len(),
        backbone.layer4.len(),
    ];
    if blocks != config.blocks {
        return Err(format!(
            "blocks per stage are {:?}, expected {:?}",
            blocks, config.blocks
        ));
    }

    let stem = backbone.conv1.weight.val().dims();
    if stem[0] != config.base_width {
        return Err(format!(
            "stem has {} channels, expected base width {}",
            stem[0], config.base_width
        ));
    }
    Ok(())
}

/// [`check_backbone`] plus the classification layer and auxiliary head
fn check_record<B: Backend>(
    config: &ResNetConfig,
    record: &SceneClassifierRecord<B>,
) -> std::result::Result<(), String> {
    check_backbone(config, &record.backbone)?;

    let head = record.fc.weight.val().dims();
    let expected = [config.feature_dim(), config.num_classes];
    if head != expected {
        return Err(format!(
            "classification layer is {:?}, expected {:?}",
            head, expected
        ));
    }

    if record.aux.is_some() != config.aux_head {
        return Err(format!(
            "auxiliary head present: {}, configured: {}",
            record.aux.is_some(),
            config.aux_head
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::checkpoint::save_checkpoint;
    use crate::training::metrics::{EpochMetrics, EpochReport};
    use burn_ndarray::NdArray;
    use std::fs;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn tiny() -> ResNetConfig {
        ResNetConfig::new([1, 1, 1, 1], 3).with_base_width(4)
    }

    fn save_tiny(dir: &TempDir, num_classes: usize) -> PathBuf {
        let device = Default::default();
        let config = tiny().for_classes(num_classes);
        let model = config.init::<TestBackend>(&device);
        let report = EpochReport {
            epoch: 0,
            train: EpochMetrics::new(1.0, 4, 2),
            eval: EpochMetrics::new(1.1, 4, 1),
            duration_secs: 0.1,
        };
        let path = dir.path().join("fold_0");
        save_checkpoint(&model, &path, &CheckpointMetadata::new(&config, 0, &report)).unwrap();
        path
    }

    fn fc_weights(model: &SceneClassifier<TestBackend>) -> Vec<f32> {
        model.fc.weight.val().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_build_fresh_without_pretrained() {
        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default());
        let model = builder.build(7, None).unwrap();
        assert_eq!(model.num_classes(), 7);
    }

    #[test]
    fn test_restore_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = save_tiny(&dir, 3);
        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default());

        let first = builder.build(3, Some(&path)).unwrap();
        let second = builder.build(3, Some(&path)).unwrap();
        assert_eq!(fc_weights(&first), fc_weights(&second));

        let conv_a = first.backbone.conv1.weight.val().into_data().to_vec::<f32>().unwrap();
        let conv_b = second.backbone.conv1.weight.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(conv_a, conv_b);
    }

    #[test]
    fn test_restore_with_wrong_class_count() {
        let dir = TempDir::new().unwrap();
        let path = save_tiny(&dir, 3);
        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default());
        assert!(matches!(builder.build(5, Some(&path)), Err(SceneError::Load(_))));
    }

    #[test]
    fn test_restore_without_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = save_tiny(&dir, 3);
        fs::remove_file(metadata_file(&path)).unwrap();

        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default());
        assert_eq!(builder.build(3, Some(&path)).unwrap().num_classes(), 3);
    }

    #[test]
    fn test_restore_without_sidecar_rejects_other_block_counts() {
        let dir = TempDir::new().unwrap();
        let path = save_tiny(&dir, 3);
        fs::remove_file(metadata_file(&path)).unwrap();

        let deeper = ResNetConfig::new([2, 2, 2, 2], 3).with_base_width(4);
        let builder = ModelBuilder::<TestBackend>::new(deeper, Default::default());
        match builder.build(3, Some(&path)) {
            Err(SceneError::Load(msg)) => assert!(msg.contains("blocks per stage")),
            other => panic!("expected Load error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_restore_without_sidecar_rejects_other_width_or_head() {
        let dir = TempDir::new().unwrap();
        let path = save_tiny(&dir, 3);
        fs::remove_file(metadata_file(&path)).unwrap();

        let wider = ModelBuilder::<TestBackend>::new(tiny().with_base_width(8), Default::default());
        assert!(matches!(wider.build(3, Some(&path)), Err(SceneError::Load(_))));

        let with_aux = ModelBuilder::<TestBackend>::new(tiny().with_aux_head(true), Default::default());
        assert!(matches!(with_aux.build(3, Some(&path)), Err(SceneError::Load(_))));

        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default());
        assert!(matches!(builder.build(5, Some(&path)), Err(SceneError::Load(_))));
    }

    #[test]
    fn test_restore_missing_file() {
        let dir = TempDir::new().unwrap();
        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default());
        let result = builder.build(3, Some(&dir.path().join("fold_9")));
        assert!(matches!(result, Err(SceneError::Load(_))));
    }

    #[test]
    fn test_restore_corrupt_weights() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fold_0");
        fs::write(weights_file(&path), b"garbage").unwrap();

        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default());
        assert!(matches!(builder.build(3, Some(&path)), Err(SceneError::Load(_))));
    }

    #[test]
    fn test_missing_pretrained_file() {
        let dir = TempDir::new().unwrap();
        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default())
            .with_pretrained(Some(dir.path().join("resnet50.pth")));
        assert!(matches!(builder.build(3, None), Err(SceneError::Load(_))));
    }

    /// torchvision-layout state dict for `tiny()`, written by
    /// `scripts/make_pretrained_fixture.py`
    fn tiny_pretrained() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tiny_resnet.pth")
    }

    fn values<const D: usize>(tensor: burn::tensor::Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_pretrained_backbone_maps_projection_shortcuts() {
        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default())
            .with_pretrained(Some(tiny_pretrained()));
        let model = builder.build(3, None).unwrap();
        assert_eq!(model.num_classes(), 3);

        let backbone = &model.backbone;
        assert!(values(backbone.conv1.weight.val()).iter().all(|v| *v == 0.5));

        for stage in [&backbone.layer1, &backbone.layer2, &backbone.layer3, &backbone.layer4] {
            let shortcut = stage[0].downsample.as_ref().unwrap();
            assert!(values(shortcut.conv.weight.val()).iter().all(|v| *v == 0.25));
            assert!(values(shortcut.bn.running_var.value()).iter().all(|v| *v == 2.0));
            assert!(values(stage[0].conv1.weight.val()).iter().all(|v| *v != 0.25));
        }
        assert_eq!(
            backbone.layer1[0].downsample.as_ref().unwrap().conv.weight.val().dims(),
            [16, 4, 1, 1]
        );
    }

    #[test]
    fn test_pretrained_backbone_keeps_fresh_head() {
        let builder = ModelBuilder::<TestBackend>::new(tiny(), Default::default())
            .with_pretrained(Some(tiny_pretrained()));
        // The file carries a 10-class `fc`, which must not leak into the head
        let model = builder.build(3, None).unwrap();
        assert_eq!(model.fc.weight.val().dims(), [tiny().feature_dim(), 3]);
    }

    #[test]
    fn test_pretrained_backbone_with_other_block_counts() {
        let deeper = ResNetConfig::new([2, 1, 1, 1], 3).with_base_width(4);
        let builder = ModelBuilder::<TestBackend>::new(deeper, Default::default())
            .with_pretrained(Some(tiny_pretrained()));
        assert!(matches!(builder.build(3, None), Err(SceneError::Load(_))));
    }
}
