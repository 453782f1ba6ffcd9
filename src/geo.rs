//! Spatial configuration and the guard that requires it.

use async_trait::async_trait;
use serde::{
    Serialize, Deserialize
};

use crate::{
    error::{
        ConfigError,
        TaskError,
    },
    task::{
        Task, TaskOptions, TaskState,
    },
};

pub type Position = [f64; 2];
pub type Ring = Vec<Position>;
pub type Polygon = Vec<Ring>;
pub type MultiPolygon = Vec<Polygon>;

pub const DEFAULT_CRS: &str = "EPSG:4326";
pub const DEFAULT_SCALE: f64 = 1000.0;

// global land band, the poles carry no data we care about
pub fn default_aoi() -> MultiPolygon {
    vec![vec![vec![
        [-180.0, -58.0],
        [180.0, -58.0],
        [180.0, 84.0],
        [-180.0, 84.0],
        [-180.0, -58.0],
    ]]]
}

/// Area of interest, coordinate reference and resolution of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoConfig {
    pub aoi: Option<MultiPolygon>,

    pub crs: Option<String>,

    // meters per pixel
    pub scale: Option<f64>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        GeoConfig {
            aoi: Some(default_aoi()),
            crs: Some(DEFAULT_CRS.to_string()),
            scale: Some(DEFAULT_SCALE),
        }
    }
}

impl GeoConfig {
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn with_aoi(mut self, aoi: MultiPolygon) -> Self {
        self.aoi = Some(aoi);
        self
    }

    /// Outer ring of the first polygon, used as the default export region.
    pub fn extent(&self) -> Option<&Ring> {
        self.aoi.as_ref()?.first()?.first()
    }

    pub fn crs(&self) -> &str {
        self.crs.as_deref().unwrap_or(DEFAULT_CRS)
    }

    pub fn scale(&self) -> f64 {
        self.scale.unwrap_or(DEFAULT_SCALE)
    }

    /// Replace aoi with the bounding box of the given ring.
    pub fn set_aoi_from_bounds(&mut self, ring: &[Position]) -> Result<(), ConfigError> {
        if ring.is_empty() {
            return Err(ConfigError::InvalidAoi("empty bounds".to_string()));
        }
        let (mut west, mut south) = (f64::MAX, f64::MAX);
        let (mut east, mut north) = (f64::MIN, f64::MIN);
        for [lon, lat] in ring {
            west = west.min(*lon);
            east = east.max(*lon);
            south = south.min(*lat);
            north = north.max(*lat);
        }
        self.aoi = Some(vec![vec![vec![
            [west, south],
            [east, south],
            [east, north],
            [west, north],
            [west, south],
        ]]]);
        Ok(())
    }

    /// All of aoi, scale and crs must be present and non-trivial, and aoi
    /// must be a well-formed multipolygon.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let aoi = match &self.aoi {
            Some(aoi) if false == aoi.is_empty() => aoi,
            _ => return Err(ConfigError::MissingGeo),
        };
        let scale_ok = self.scale.map_or(false, |s| s > 0.0 && s.is_finite());
        let crs_ok = self.crs.as_deref().map_or(false, |c| false == c.trim().is_empty());
        if !scale_ok || !crs_ok {
            return Err(ConfigError::MissingGeo);
        }
        for polygon in aoi {
            if polygon.is_empty() {
                return Err(ConfigError::InvalidAoi(format!("{aoi:?}")));
            }
            for ring in polygon {
                let closed = ring.first() == ring.last();
                if ring.len() < 4 || !closed {
                    return Err(ConfigError::InvalidAoi(format!("{aoi:?}")));
                }
            }
        }
        Ok(())
    }
}

/// Local geospatial work run under the geo guard.
#[async_trait]
pub trait GeoWork: Send {
    async fn calc(&mut self, geo: &GeoConfig, state: &TaskState) -> Result<(), TaskError>;
}

/// A lifecycle task that refuses to calc without spatial configuration.
pub struct GeoTask<W> {
    state: TaskState,
    pub geo: GeoConfig,
    pub work: W,
}

impl<W: GeoWork> GeoTask<W> {
    pub fn new(work: W, geo: GeoConfig, options: &TaskOptions) -> Self {
        GeoTask {
            state: TaskState::new(options),
            geo: geo,
            work: work,
        }
    }
}

// shared by every task that needs the guard
pub(crate) fn guard(geo: &GeoConfig, state: &mut TaskState) -> Result<(), TaskError> {
    if let Err(e) = geo.validate() {
        state.fail();
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl<W: GeoWork> Task for GeoTask<W> {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    async fn check_inputs(&mut self) -> Result<(), TaskError> {
        guard(&self.geo, &mut self.state)
    }

    async fn calc(&mut self) -> Result<(), TaskError> {
        self.work.calc(&self.geo, &self.state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Status;

    struct CountCalcs(usize);

    #[async_trait]
    impl GeoWork for CountCalcs {
        async fn calc(&mut self, _geo: &GeoConfig, _state: &TaskState) -> Result<(), TaskError> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn defaults_are_valid() {
        let geo = GeoConfig::default();
        assert!(geo.validate().is_ok());
        assert_eq!(geo.extent().unwrap().len(), 5);
        assert_eq!(geo.crs(), "EPSG:4326");
    }

    #[test]
    fn zero_scale_or_blank_crs_is_missing_config() {
        let geo = GeoConfig::default().with_scale(0.0);
        assert!(matches!(geo.validate(), Err(ConfigError::MissingGeo)));
        let geo = GeoConfig::default().with_crs("  ");
        assert!(matches!(geo.validate(), Err(ConfigError::MissingGeo)));
        let geo = GeoConfig { aoi: None, ..GeoConfig::default() };
        assert!(matches!(geo.validate(), Err(ConfigError::MissingGeo)));
    }

    #[test]
    fn open_ring_is_invalid() {
        let geo = GeoConfig::default().with_aoi(vec![vec![vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 1.0],
        ]]]);
        assert!(matches!(geo.validate(), Err(ConfigError::InvalidAoi(_))));
    }

    #[test]
    fn bounds_become_a_closed_box() {
        let mut geo = GeoConfig::default();
        geo.set_aoi_from_bounds(&[[10.0, 5.0], [12.0, -3.0], [11.0, 7.5]]).unwrap();
        let extent = geo.extent().unwrap();
        assert_eq!(extent[0], [10.0, -3.0]);
        assert_eq!(extent[2], [12.0, 7.5]);
        assert!(geo.validate().is_ok());
    }

    #[tokio::test]
    async fn guard_fails_the_run_before_calc() {
        let geo = GeoConfig { scale: None, ..GeoConfig::default() };
        let mut task = GeoTask::new(CountCalcs(0), geo, &TaskOptions::default());
        let err = task.run().await.unwrap_err();
        assert!(matches!(err, TaskError::Config(ConfigError::MissingGeo)));
        assert_eq!(task.status(), Status::Failed);
        assert_eq!(task.work.0, 0);
    }

    #[tokio::test]
    async fn configured_task_completes() {
        let mut task = GeoTask::new(CountCalcs(0), GeoConfig::default(), &TaskOptions::default());
        assert_eq!(task.run().await.unwrap(), Status::Complete);
        assert_eq!(task.work.0, 1);
    }
}
