//! 流水线编排: 输入 -> 分类 -> 输出.
//!
//! 三个阶段以 trait 约定, 具体实现可独立替换而不改变时序契约.
//! 编排器自身不翻译也不吞掉任何错误: 任一阶段失败即中止序列,
//! 并把第一个错误原样转发给调用方; 核心内部不做重试.

use log::info;

use crate::classify::{ClassificationError, IcmReport};
use crate::input::InputError;
use crate::params::ParameterSet;
use crate::validate::{OutputError, ValidationRecord};
use crate::{McLabel, McScan};

/// 输入阶段的产物: 一个多通道扫描与一个真值标签体.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    /// 装配完成的多通道扫描.
    pub scan: McScan,

    /// 对齐到图像坐标系的真值标签体.
    pub truth: McLabel,
}

/// 输入阶段契约: 产出扫描与真值, 除此之外无副作用.
pub trait InputStage {
    /// 按参数记录装配输入.
    fn produce(&mut self, params: &ParameterSet) -> Result<PipelineInput, InputError>;
}

/// 分类阶段契约: 把扫描变成与之同网格的标签体.
pub trait ClassifierStage {
    /// 执行分类. 未收敛不是错误, 由报告说明.
    fn classify(
        &mut self,
        params: &ParameterSet,
        scan: &McScan,
    ) -> Result<(McLabel, IcmReport), ClassificationError>;
}

/// 输出阶段契约: 对比计算结果与真值, 产出并持久化验证记录.
pub trait OutputStage {
    /// 产出验证记录. 持久化失败时记录附在错误中.
    fn emit(
        &mut self,
        params: &ParameterSet,
        computed: &McLabel,
        truth: &McLabel,
    ) -> Result<ValidationRecord, OutputError>;
}

/// 流水线状态.
///
/// 三个初始化钩子必须按 解析器 -> 分类器 -> 输出 的顺序调用,
/// 每个钩子把状态推进到对应的 Ready; `execute` 要求 [`Self::OutputReady`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// 构造完成, 尚未配置任何阶段.
    Uninitialized,

    /// 输入解析器已配置.
    ParserReady,

    /// 分类器已配置.
    ClassifierReady,

    /// 输出阶段已配置, 可以执行.
    OutputReady,

    /// 一次运行成功结束.
    Complete,

    /// 运行因某阶段出错而中止.
    Failed,
}

/// 流水线错误: 状态机误用, 或某阶段错误的原样转发.
#[derive(Debug)]
pub enum PipelineError {
    /// 在不允许的状态下调用了钩子或 `execute`. (期望状态, 实际状态)
    NotReady(PipelineState, PipelineState),

    /// 输入阶段错误.
    Input(InputError),

    /// 分类阶段错误.
    Classification(ClassificationError),

    /// 输出阶段错误.
    Output(OutputError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotReady(want, got) => {
                write!(f, "pipeline is in state {got:?}, expected {want:?}")
            }
            Self::Input(e) => write!(f, "input stage failed: {e}"),
            Self::Classification(e) => write!(f, "classification stage failed: {e}"),
            Self::Output(e) => write!(f, "output stage failed: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<InputError> for PipelineError {
    #[inline]
    fn from(e: InputError) -> Self {
        Self::Input(e)
    }
}

impl From<ClassificationError> for PipelineError {
    #[inline]
    fn from(e: ClassificationError) -> Self {
        Self::Classification(e)
    }
}

impl From<OutputError> for PipelineError {
    #[inline]
    fn from(e: OutputError) -> Self {
        Self::Output(e)
    }
}

/// 一次成功运行的全部产物.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// 验证记录 (已按参数持久化).
    pub record: ValidationRecord,

    /// ICM 收敛报告.
    pub report: IcmReport,

    labels: McLabel,
}

impl RunOutcome {
    /// 计算标签体的只读引用. 供展示类协作者消费, 不可变更分类状态.
    #[inline]
    pub fn labels(&self) -> &McLabel {
        &self.labels
    }
}

/// 验证流水线.
///
/// 一个实例对应一次运行: 独占持有参数记录与运行期间的全部体数据,
/// 阶段之间严格串行, 无重叠执行.
#[derive(Debug)]
pub struct Pipeline<P, C, O> {
    params: ParameterSet,
    parser: Option<P>,
    classifier: Option<C>,
    output: Option<O>,
    state: PipelineState,
}

impl<P, C, O> Pipeline<P, C, O>
where
    P: InputStage,
    C: ClassifierStage,
    O: OutputStage,
{
    /// 以一份校验过的参数记录构造流水线.
    pub fn new(params: ParameterSet) -> Self {
        Self {
            params,
            parser: None,
            classifier: None,
            output: None,
            state: PipelineState::Uninitialized,
        }
    }

    /// 当前状态.
    #[inline]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// 本次运行的参数记录.
    #[inline]
    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn expect_state(&self, want: PipelineState) -> Result<(), PipelineError> {
        if self.state == want {
            Ok(())
        } else {
            Err(PipelineError::NotReady(want, self.state))
        }
    }

    /// 配置输入解析器.
    pub fn initialize_parser(&mut self, parser: P) -> Result<(), PipelineError> {
        self.expect_state(PipelineState::Uninitialized)?;
        self.parser = Some(parser);
        self.state = PipelineState::ParserReady;
        Ok(())
    }

    /// 配置分类器.
    pub fn initialize_classifier(&mut self, classifier: C) -> Result<(), PipelineError> {
        self.expect_state(PipelineState::ParserReady)?;
        self.classifier = Some(classifier);
        self.state = PipelineState::ClassifierReady;
        Ok(())
    }

    /// 配置输出阶段.
    pub fn initialize_output(&mut self, output: O) -> Result<(), PipelineError> {
        self.expect_state(PipelineState::ClassifierReady)?;
        self.output = Some(output);
        self.state = PipelineState::OutputReady;
        Ok(())
    }

    /// 按严格顺序执行 输入 -> 分类 -> 输出.
    ///
    /// 成功转入 [`PipelineState::Complete`], 任一阶段出错则转入
    /// [`PipelineState::Failed`] 并原样转发该错误. 每个实例只执行一次.
    pub fn execute(&mut self) -> Result<RunOutcome, PipelineError> {
        self.expect_state(PipelineState::OutputReady)?;
        match self.run_stages() {
            Ok(outcome) => {
                self.state = PipelineState::Complete;
                Ok(outcome)
            }
            Err(e) => {
                self.state = PipelineState::Failed;
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> Result<RunOutcome, PipelineError> {
        // OutputReady 状态下三个阶段必然就位.
        let (Some(parser), Some(classifier), Some(output)) = (
            self.parser.as_mut(),
            self.classifier.as_mut(),
            self.output.as_mut(),
        ) else {
            unreachable!()
        };

        info!("pipeline run for patient {}", self.params.patient_id());
        let PipelineInput { scan, truth } = parser.produce(&self.params)?;
        let (labels, report) = classifier.classify(&self.params, &scan)?;
        let record = output.emit(&self.params, &labels, &truth)?;

        Ok(RunOutcome {
            record,
            report,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::DegenerateModelError;
    use crate::params::SliceRange;
    use crate::{McScan, VolumeGeometry, VoxelSpacing};
    use ndarray::Array3;

    fn params() -> ParameterSet {
        ParameterSet::builder()
            .patient_id("stub")
            .image_dir("/tmp")
            .seg_dir("/tmp")
            .add_file_extension("_t1")
            .truth_extension("_seg")
            .image_slices(SliceRange::new(0, 2))
            .seg_slices(SliceRange::new(0, 2))
            .num_classes(2)
            .truth_labels([1])
            .output_file("/tmp/out.txt")
            .build()
            .unwrap()
    }

    struct StubParser;

    impl InputStage for StubParser {
        fn produce(&mut self, _params: &ParameterSet) -> Result<PipelineInput, InputError> {
            let scan = McScan::from_channels(
                vec![Array3::<f32>::zeros((2, 2, 2))],
                VoxelSpacing::isotropic_1mm(),
            )
            .unwrap();
            let truth = McLabel::filled((2, 2, 2), VoxelSpacing::isotropic_1mm(), 1);
            Ok(PipelineInput { scan, truth })
        }
    }

    struct StubClassifier(Option<ClassificationError>);

    impl ClassifierStage for StubClassifier {
        fn classify(
            &mut self,
            _params: &ParameterSet,
            scan: &McScan,
        ) -> Result<(McLabel, IcmReport), ClassificationError> {
            if let Some(e) = self.0.take() {
                return Err(e);
            }
            let labels = McLabel::filled((2, 2, 2), scan.spacing(), 1);
            let report = IcmReport {
                iterations: 1,
                final_change_fraction: 0.0,
                converged: true,
            };
            Ok((labels, report))
        }
    }

    struct StubOutput;

    impl OutputStage for StubOutput {
        fn emit(
            &mut self,
            params: &ParameterSet,
            computed: &McLabel,
            truth: &McLabel,
        ) -> Result<ValidationRecord, OutputError> {
            Ok(crate::validate::validate(
                params.patient_id(),
                computed,
                either::Either::Left(truth),
                params.truth_labels(),
            ))
        }
    }

    type StubPipeline = Pipeline<StubParser, StubClassifier, StubOutput>;

    fn ready_pipeline(classifier: StubClassifier) -> StubPipeline {
        let mut p = Pipeline::new(params());
        p.initialize_parser(StubParser).unwrap();
        p.initialize_classifier(classifier).unwrap();
        p.initialize_output(StubOutput).unwrap();
        p
    }

    #[test]
    fn test_state_progression() {
        let mut p: StubPipeline = Pipeline::new(params());
        assert_eq!(p.state(), PipelineState::Uninitialized);
        p.initialize_parser(StubParser).unwrap();
        assert_eq!(p.state(), PipelineState::ParserReady);
        p.initialize_classifier(StubClassifier(None)).unwrap();
        assert_eq!(p.state(), PipelineState::ClassifierReady);
        p.initialize_output(StubOutput).unwrap();
        assert_eq!(p.state(), PipelineState::OutputReady);
    }

    #[test]
    fn test_out_of_order_initialization_rejected() {
        let mut p: StubPipeline = Pipeline::new(params());
        let err = p.initialize_classifier(StubClassifier(None)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NotReady(PipelineState::ParserReady, PipelineState::Uninitialized)
        ));
    }

    #[test]
    fn test_execute_requires_all_stages() {
        let mut p: StubPipeline = Pipeline::new(params());
        p.initialize_parser(StubParser).unwrap();
        let err = p.execute().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NotReady(PipelineState::OutputReady, PipelineState::ParserReady)
        ));
    }

    #[test]
    fn test_execute_success_completes() {
        let mut p = ready_pipeline(StubClassifier(None));
        let outcome = p.execute().unwrap();
        assert_eq!(p.state(), PipelineState::Complete);
        assert!(outcome.report.converged);
        assert_eq!(outcome.record.patient_id, "stub");
        assert_eq!(outcome.record.estimated_mm3, 8.0);
        assert_eq!(outcome.labels().count(1), 8);

        // 每个实例只执行一次.
        let err = p.execute().unwrap_err();
        assert!(matches!(err, PipelineError::NotReady(_, _)));
    }

    #[test]
    fn test_end_to_end_with_npy_dataset() {
        use crate::classify::MrfGaussianClassifier;
        use crate::input::{NpySliceReader, ValidationInputParser};
        use crate::validate::LesionLoadOutput;
        use ndarray::Array2;
        use ndarray_npy::WriteNpyExt;
        use std::fs::{self, File};

        let mut dir = std::env::temp_dir();
        dir.push(format!("ms-berry-pipeline-e2e-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        // 单通道 4 张 4x4 切片: 后两张强度 10, 真值把它们标为 1.
        for i in 1..=4 {
            let fill = if i >= 3 { 10.0f32 } else { 0.0 };
            Array2::<f32>::from_elem((4, 4), fill)
                .write_npy(File::create(dir.join(format!("p09_t1.{i}.npy"))).unwrap())
                .unwrap();
            Array2::<u8>::from_elem((4, 4), u8::from(i >= 3))
                .write_npy(File::create(dir.join(format!("p09_seg.{i}.npy"))).unwrap())
                .unwrap();
        }

        let out_file = dir.join("result.txt");
        let params = ParameterSet::builder()
            .patient_id("p09")
            .image_dir(&dir)
            .seg_dir(&dir)
            .add_file_extension("_t1")
            .truth_extension("_seg")
            .image_slices(SliceRange::new(1, 4))
            .seg_slices(SliceRange::new(1, 4))
            .num_classes(2)
            .truth_labels([1])
            .smoothing_factor(0.0)
            .error_tolerance(0.0)
            .output_file(&out_file)
            .append_output(false)
            .build()
            .unwrap();

        let mut pipeline = Pipeline::new(params);
        pipeline
            .initialize_parser(ValidationInputParser::new(
                NpySliceReader,
                VoxelSpacing::isotropic_1mm(),
            ))
            .unwrap();
        pipeline
            .initialize_classifier(MrfGaussianClassifier::new())
            .unwrap();
        pipeline.initialize_output(LesionLoadOutput::new()).unwrap();

        let outcome = pipeline.execute().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Complete);
        assert!(outcome.report.converged);
        assert_eq!(outcome.record.estimated_mm3, 32.0);
        assert_eq!(outcome.record.true_mm3, 32.0);
        assert_eq!(outcome.record.absolute_error_mm3, 0.0);

        let content = fs::read_to_string(&out_file).unwrap();
        assert!(content.starts_with('#'));
        assert!(content.lines().any(|l| l.starts_with("p09  ")));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stage_error_forwarded_verbatim() {
        let inner = ClassificationError::Degenerate(DegenerateModelError::EmptyClass(1));
        let mut p = ready_pipeline(StubClassifier(Some(inner.clone())));
        let err = p.execute().unwrap_err();
        assert_eq!(p.state(), PipelineState::Failed);
        match err {
            PipelineError::Classification(e) => assert_eq!(e, inner),
            other => panic!("unexpected error kind: {other:?}"),
        }
    }
}
