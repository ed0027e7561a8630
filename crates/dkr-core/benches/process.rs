use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dkr_core::{parse, Engine};

const RULES: &str = r#"DOMÍNIO: Licenças de Software

FATOS CONHECIDOS:
A licença AGPL-3.0 tem criticidade ALTO.
  Motivo: copyleft de rede
A licença MIT tem criticidade BAIXO.

PADRÕES DE INTENÇÃO:
criticidade_alta:
  - "mais crítica"
  - "maior risco"
  - "mais perigosa"
permissiva:
  - "mais permissiva"

EXPANSÃO DE BUSCA:
Para criticidade_alta adicionar: "AGPL", "copyleft forte", "criticidade ALTO"

NORMALIZAÇÃO DE TERMOS:
"GPLA" corrigir para: "GPL"
"Apache2" corrigir para: "Apache-2.0"

REGRAS DE VALIDAÇÃO:
QUANDO usuário pergunta "mais permissiva"
  E resposta NÃO menciona "MIT"
ENTÃO corrigir para:
  A licença mais permissiva é a MIT.
QUANDO usuário pergunta "mais crítica"
  OU "maior risco"
  E resposta menciona "MIT"
  E resposta NÃO menciona "AGPL"
ENTÃO corrigir para:
  A licença mais crítica é AGPL-3.0 (ALTO).

SINÔNIMOS:
"crítica" também pode ser: "perigosa", "arriscada"
"licença" também pode ser: "license"
"#;

fn bench_process(c: &mut Criterion) {
    let rules = parse(RULES).expect("benchmark rules parse");
    let engine = Engine::new();

    c.bench_function("process_corrected", |b| {
        b.iter(|| {
            engine.process(
                black_box(&rules),
                black_box("Qual é a licença mais arriscada?"),
                black_box("A licença mais crítica é MIT, derivada da GPLA."),
            )
        })
    });

    c.bench_function("process_passthrough", |b| {
        b.iter(|| {
            engine.process(
                black_box(&rules),
                black_box("Quantas licenças existem?"),
                black_box("Existem duas licenças no inventário."),
            )
        })
    });
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_rules", |b| b.iter(|| parse(black_box(RULES))));
}

criterion_group!(benches, bench_process, bench_parse);
criterion_main!(benches);
