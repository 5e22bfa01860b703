use std::path::Path;

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use image::{imageops::FilterType, DynamicImage, ImageReader};
use rand::Rng;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use super::ImSituItem;

pub const IMAGE_SIZE: usize = 224;
const CHANNEL_COUNT: usize = 3;

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Clone, Debug)]
pub struct ImSituBatch<B: Backend> {
    /// `[batch, 3, 224, 224]`, normalized.
    pub images: Tensor<B, 4>,
    /// Gold labels on the host, in batch order.
    pub labels: Vec<usize>,
}

#[derive(Clone)]
pub struct ImSituBatcher<B: Backend> {
    device: B::Device,
    augment: bool,
}

impl<B: Backend> ImSituBatcher<B> {
    /// Batcher for evaluation: images are only resized and normalized.
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            augment: false,
        }
    }

    /// Batcher for training: images are also flipped horizontally at random.
    pub fn training(device: B::Device) -> Self {
        Self {
            device,
            augment: true,
        }
    }
}

impl<B: Backend> Batcher<ImSituItem, ImSituBatch<B>> for ImSituBatcher<B> {
    fn batch(&self, items: Vec<ImSituItem>) -> ImSituBatch<B> {
        let pixels: Vec<Vec<f32>> = items
            .par_iter()
            .map(|item| {
                let image = decode(&item.image_path);
                let flip = self.augment && rand::thread_rng().gen_bool(0.5);
                to_chw(&image, flip)
            })
            .collect();

        let images = pixels
            .into_iter()
            .map(|data| {
                TensorData::new(data, [1, CHANNEL_COUNT, IMAGE_SIZE, IMAGE_SIZE])
                    .convert::<B::FloatElem>()
            })
            .map(|data| Tensor::<B, 4>::from_data(data, &self.device))
            .collect();

        ImSituBatch {
            images: Tensor::cat(images, 0),
            labels: items.iter().map(|item| item.label).collect(),
        }
    }
}

// The batcher cannot return errors and a lost image would silently shift
// accuracy, so an unreadable image aborts the run.
fn decode(path: &Path) -> DynamicImage {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode())
        .unwrap_or_else(|err| panic!("failed to decode image {}: {err}", path.display()))
}

/// Resizes to the network input and lays out normalized channels first.
fn to_chw(image: &DynamicImage, flip: bool) -> Vec<f32> {
    let image = image
        .resize_exact(IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::Triangle)
        .to_rgb8();
    let plane = IMAGE_SIZE * IMAGE_SIZE;
    let mut data = vec![0.0; CHANNEL_COUNT * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let x = if flip {
            IMAGE_SIZE - 1 - x as usize
        } else {
            x as usize
        };
        let offset = y as usize * IMAGE_SIZE + x;
        for (channel, &value) in pixel.0.iter().enumerate() {
            data[channel * plane + offset] = (value as f32 / 255. - MEAN[channel]) / STD[channel];
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn write_image(dir: &Path, name: &str, left: [u8; 3], right: [u8; 3]) -> std::path::PathBuf {
        let image = RgbImage::from_fn(8, 8, |x, _| if x < 4 { Rgb(left) } else { Rgb(right) });
        let path = dir.join(name);
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn flip_mirrors_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "a.png", [255, 255, 255], [0, 0, 0]);
        let image = decode(&path);

        let plain = to_chw(&image, false);
        let flipped = to_chw(&image, true);

        assert_eq!(plain.len(), CHANNEL_COUNT * IMAGE_SIZE * IMAGE_SIZE);
        assert_eq!(plain[0], flipped[IMAGE_SIZE - 1]);
        assert!(plain[0] > plain[IMAGE_SIZE - 1]);
    }

    #[test]
    fn batch_stacks_images_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![
            ImSituItem {
                image_path: write_image(dir.path(), "a.png", [10, 20, 30], [10, 20, 30]),
                label: 2,
            },
            ImSituItem {
                image_path: write_image(dir.path(), "b.png", [200, 0, 0], [0, 0, 200]),
                label: 0,
            },
        ];

        let batch = ImSituBatcher::<TestBackend>::new(Default::default()).batch(items);

        assert_eq!(batch.images.dims(), [2, 3, IMAGE_SIZE, IMAGE_SIZE]);
        assert_eq!(batch.labels, vec![2, 0]);
    }

    #[test]
    #[should_panic(expected = "failed to decode image")]
    fn unreadable_image_panics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        ImSituBatcher::<TestBackend>::new(Default::default()).batch(vec![ImSituItem {
            image_path: path,
            label: 0,
        }]);
    }
}
